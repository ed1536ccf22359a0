//! The tunnel client process.
//!
//! The configuration file is regenerated on every launch from the current
//! port pair and endpoint, so a restart never picks up a previous assignment.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fleetport_core::TunnelEndpoint;
use tokio::sync::Mutex;

use crate::error::{AgentError, Result};
use crate::supervisor::{LaunchSpec, ProcessHandle, ProcessSupervisor, StopOutcome};

pub(crate) const ROLE: &str = "tunnel";

/// The port mapping a tunnel exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRoute {
    /// Service name, used for the proxy section name.
    pub service: String,
    /// Port on the tunnel server.
    pub remote_port: u16,
    /// Local port the workload listens on.
    pub local_port: u16,
}

struct RunningTunnel {
    handle: ProcessHandle,
    route: TunnelRoute,
    endpoint: TunnelEndpoint,
}

/// Owns the tunnel process handle.
pub struct TunnelManager {
    supervisor: Arc<ProcessSupervisor>,
    program: String,
    config_path: PathBuf,
    fallback: Option<TunnelEndpoint>,
    stop_timeout: Duration,
    slot: Mutex<Option<RunningTunnel>>,
}

impl TunnelManager {
    /// Create a manager.
    ///
    /// `fallback` is used when a start request carries no endpoint.
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        program: impl Into<String>,
        config_path: impl Into<PathBuf>,
        fallback: Option<TunnelEndpoint>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            supervisor,
            program: program.into(),
            config_path: config_path.into(),
            fallback,
            stop_timeout,
            slot: Mutex::new(None),
        }
    }

    /// Start the tunnel for `route`.
    ///
    /// A tunnel already running for the same route and endpoint is kept;
    /// otherwise the old one is stopped and a new one launched.
    ///
    /// # Errors
    ///
    /// Returns `Config` if no endpoint is known, `Io` if the configuration
    /// cannot be written, and `ProcessLaunchFailure` if the spawn fails.
    pub async fn start(&self, route: TunnelRoute, endpoint: Option<TunnelEndpoint>) -> Result<u32> {
        let endpoint = endpoint
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| AgentError::Config("no tunnel server configured".to_string()))?;

        let mut slot = self.slot.lock().await;
        if let Some(running) = slot.as_mut() {
            if running.route == route && running.endpoint == endpoint && running.handle.is_running() {
                tracing::debug!(pid = running.handle.pid(), "Tunnel already running");
                return Ok(running.handle.pid());
            }
        }
        if let Some(mut previous) = slot.take() {
            tracing::info!(
                old_remote_port = previous.route.remote_port,
                new_remote_port = route.remote_port,
                "Restarting tunnel"
            );
            self.supervisor.stop(&mut previous.handle, self.stop_timeout).await?;
        }

        if let Some(parent) = self.config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.config_path, render_config(&route, &endpoint)).await?;

        let handle = self.supervisor.start(&LaunchSpec {
            role: ROLE.to_string(),
            program: self.program.clone(),
            args: vec!["-c".to_string(), self.config_path.to_string_lossy().into_owned()],
            env: Vec::new(),
        })?;
        let pid = handle.pid();
        tracing::info!(
            pid,
            remote_port = route.remote_port,
            local_port = route.local_port,
            server = %endpoint.server_addr,
            "Tunnel started"
        );
        *slot = Some(RunningTunnel {
            handle,
            route,
            endpoint,
        });

        Ok(pid)
    }

    /// Stop the tunnel and forget its handle.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the forced kill cannot be awaited.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let mut slot = self.slot.lock().await;
        match slot.take() {
            Some(mut running) => self.supervisor.stop(&mut running.handle, self.stop_timeout).await,
            None => Ok(StopOutcome::AlreadyStopped),
        }
    }

    /// Route of the running tunnel, if any.
    pub async fn route(&self) -> Option<TunnelRoute> {
        self.slot.lock().await.as_ref().map(|r| r.route.clone())
    }
}

/// Render the tunnel client configuration.
#[must_use]
pub fn render_config(route: &TunnelRoute, endpoint: &TunnelEndpoint) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[common]");
    let _ = writeln!(out, "server_addr = {}", endpoint.server_addr);
    let _ = writeln!(out, "server_port = {}", endpoint.server_port);
    let _ = writeln!(out, "token = {}", endpoint.token);
    let _ = writeln!(out);
    let _ = writeln!(out, "[{}_{}]", route.service, route.remote_port);
    let _ = writeln!(out, "type = tcp");
    let _ = writeln!(out, "local_ip = 127.0.0.1");
    let _ = writeln!(out, "local_port = {}", route.local_port);
    let _ = writeln!(out, "remote_port = {}", route.remote_port);
    out
}
