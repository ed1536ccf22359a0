//! The workload process (the remote IDE server).

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::{AgentError, Result};
use crate::supervisor::{LaunchSpec, ProcessHandle, ProcessSupervisor, StopOutcome};

pub(crate) const ROLE: &str = "workload";
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);
const REMEDIATION_PASSWORD_LEN: usize = 24;

/// Result of a remediation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Remediation {
    /// Pid of the process that was replaced.
    pub old_pid: u32,
    /// Pid of the replacement.
    pub new_pid: u32,
}

/// Owns the workload process handle.
///
/// Start, stop and remediation hold the same lock for their whole duration,
/// so a heartbeat restart can never interleave with a task-driven stop.
pub struct WorkloadManager {
    supervisor: Arc<ProcessSupervisor>,
    program: String,
    bind: String,
    stop_timeout: Duration,
    slot: Mutex<Option<ProcessHandle>>,
}

impl WorkloadManager {
    /// Create a manager for `program` listening on `bind` (`host:port`).
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        program: impl Into<String>,
        bind: impl Into<String>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            supervisor,
            program: program.into(),
            bind: bind.into(),
            stop_timeout,
            slot: Mutex::new(None),
        }
    }

    /// Local port the workload listens on.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Config` if the bind address has no valid port.
    pub fn bind_port(&self) -> Result<u16> {
        self.bind
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .ok_or_else(|| AgentError::Config(format!("invalid workload bind address: {}", self.bind)))
    }

    fn launch_spec(&self, password: &str) -> LaunchSpec {
        LaunchSpec {
            role: ROLE.to_string(),
            program: self.program.clone(),
            args: vec![
                "--bind-addr".to_string(),
                self.bind.clone(),
                "--auth".to_string(),
                "password".to_string(),
                "--disable-telemetry".to_string(),
            ],
            env: vec![("PASSWORD".to_string(), password.to_string())],
        }
    }

    /// Start the workload, or return the running one's pid unchanged.
    ///
    /// # Errors
    ///
    /// Returns `ProcessLaunchFailure` if the process cannot be spawned.
    pub async fn start(&self, password: &str) -> Result<u32> {
        let mut slot = self.slot.lock().await;
        if let Some(handle) = slot.as_mut() {
            if handle.is_running() {
                tracing::debug!(pid = handle.pid(), "Workload already running");
                return Ok(handle.pid());
            }
        }

        let handle = self.supervisor.start(&self.launch_spec(password))?;
        let pid = handle.pid();
        *slot = Some(handle);
        Ok(pid)
    }

    /// Stop the workload and forget its handle.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the forced kill cannot be awaited.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let mut slot = self.slot.lock().await;
        match slot.take() {
            Some(mut handle) => self.supervisor.stop(&mut handle, self.stop_timeout).await,
            None => Ok(StopOutcome::AlreadyStopped),
        }
    }

    /// Pid of the managed process, if this agent started one and has not stopped it.
    pub async fn pid(&self) -> Option<u32> {
        self.slot.lock().await.as_ref().map(ProcessHandle::pid)
    }

    /// Alive and accepting TCP connections on the bind address.
    pub async fn healthy(&self) -> bool {
        let mut slot = self.slot.lock().await;
        match slot.as_mut() {
            Some(handle) => handle.is_running() && self.probe().await,
            None => false,
        }
    }

    async fn probe(&self) -> bool {
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(&self.bind)).await,
            Ok(Ok(_))
        )
    }

    /// Restart the workload once if this agent started it and it is unhealthy.
    ///
    /// Returns `None` when nothing was done: the workload was never started,
    /// was explicitly stopped, or is healthy.
    ///
    /// # Errors
    ///
    /// Returns `ProcessLaunchFailure` if the replacement cannot be spawned; the
    /// handle is then cleared so the next cycle does not retry.
    pub async fn remediate(&self) -> Result<Option<Remediation>> {
        let mut slot = self.slot.lock().await;
        let Some(handle) = slot.as_mut() else {
            return Ok(None);
        };

        let alive = handle.is_running();
        if alive && self.probe().await {
            return Ok(None);
        }

        let old_pid = handle.pid();
        tracing::warn!(pid = old_pid, alive, "Workload unhealthy, restarting");

        if let Some(mut old) = slot.take() {
            self.supervisor.stop(&mut old, self.stop_timeout).await?;
        }
        let password = fleetport_auth::generate_password(REMEDIATION_PASSWORD_LEN);
        let replacement = self.supervisor.start(&self.launch_spec(&password))?;
        let new_pid = replacement.pid();
        *slot = Some(replacement);

        tracing::info!(old_pid, new_pid, "Workload restarted");
        Ok(Some(Remediation { old_pid, new_pid }))
    }
}
