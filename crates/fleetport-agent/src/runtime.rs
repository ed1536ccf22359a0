//! Wires the agent together and runs both loops.

use std::sync::Arc;

use tokio::sync::watch;

use crate::client::ControlClient;
use crate::config::AgentConfig;
use crate::credentials::CredentialCache;
use crate::error::Result;
use crate::heartbeat::HeartbeatLoop;
use crate::supervisor::ProcessSupervisor;
use crate::tasks::TaskRunner;
use crate::tunnel::TunnelManager;
use crate::workload::WorkloadManager;

/// A fully wired agent.
pub struct AgentRuntime {
    config: AgentConfig,
    client: Arc<ControlClient>,
    workload: Arc<WorkloadManager>,
    tunnel: Arc<TunnelManager>,
    heartbeat: Arc<HeartbeatLoop>,
    tasks: Arc<TaskRunner>,
}

impl AgentRuntime {
    /// Build the runtime from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Config` if the HTTP client cannot be built.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let client = Arc::new(ControlClient::new(
            &config.api_base_url,
            &config.agent_name,
            &config.agent_secret,
            CredentialCache::new(config.credentials_path()),
            config.request_timeout(),
        )?);

        let supervisor = Arc::new(ProcessSupervisor::new(config.log_dir(), config.log_max_bytes));
        let workload = Arc::new(WorkloadManager::new(
            Arc::clone(&supervisor),
            &config.workload_bin,
            &config.workload_bind,
            config.stop_timeout(),
        ));
        let tunnel = Arc::new(TunnelManager::new(
            Arc::clone(&supervisor),
            &config.tunnel_bin,
            config.tunnel_config_path(),
            config.tunnel_endpoint(),
            config.stop_timeout(),
        ));

        let heartbeat = Arc::new(HeartbeatLoop::new(
            Arc::clone(&client),
            Arc::clone(&workload),
            Arc::clone(&supervisor),
        ));
        let tasks = Arc::new(TaskRunner::new(
            Arc::clone(&client),
            Arc::clone(&workload),
            Arc::clone(&tunnel),
        ));

        Ok(Self {
            config,
            client,
            workload,
            tunnel,
            heartbeat,
            tasks,
        })
    }

    /// The control-plane client.
    #[must_use]
    pub fn client(&self) -> &ControlClient {
        &self.client
    }

    /// The heartbeat loop.
    #[must_use]
    pub fn heartbeat(&self) -> &HeartbeatLoop {
        &self.heartbeat
    }

    /// The task runner.
    #[must_use]
    pub fn tasks(&self) -> &TaskRunner {
        &self.tasks
    }

    /// Register unless a token is already cached.
    ///
    /// # Errors
    ///
    /// Returns the registration error.
    pub async fn ensure_registered(&self) -> Result<()> {
        if self.client.has_token() {
            tracing::info!("Using cached agent credentials");
            return Ok(());
        }
        self.client.register().await?;
        Ok(())
    }

    /// Run both loops until `shutdown` flips, then stop the managed processes.
    ///
    /// # Errors
    ///
    /// Returns `Io` if a managed process cannot be reaped on shutdown.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            agent = %self.config.agent_name,
            heartbeat_sec = self.config.heartbeat_interval_sec,
            poll_sec = self.config.poll_interval_sec,
            "Agent running"
        );

        let heartbeat = tokio::spawn({
            let heartbeat = Arc::clone(&self.heartbeat);
            let every = self.config.heartbeat_interval();
            let shutdown = shutdown.clone();
            async move { heartbeat.run(every, shutdown).await }
        });
        let tasks = tokio::spawn({
            let tasks = Arc::clone(&self.tasks);
            let every = self.config.poll_interval();
            async move { tasks.run(every, shutdown).await }
        });

        for (name, handle) in [("heartbeat", heartbeat), ("tasks", tasks)] {
            if let Err(e) = handle.await {
                tracing::error!(loop_name = name, error = %e, "Loop panicked");
            }
        }

        tracing::info!("Stopping managed processes");
        self.tunnel.stop().await?;
        self.workload.stop().await?;
        Ok(())
    }
}
