//! Child process supervision.
//!
//! Launches managed processes with their output appended to per-role log
//! files and stops them with a bounded grace period before a forced kill.
//!
//! Logs are rotated to `<file>.1` when a process launches and trimmed in place
//! by [`ProcessSupervisor::trim_logs`] while it runs.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::error::{AgentError, Result};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What to launch for a managed role.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Role name, also used for log file names.
    pub role: String,
    /// Executable.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

/// A launched child process.
#[derive(Debug)]
pub struct ProcessHandle {
    role: String,
    pid: u32,
    started_at: DateTime<Utc>,
    child: Child,
    exited: bool,
}

impl ProcessHandle {
    /// Role this process was launched for.
    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    /// OS process id recorded at launch.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Launch time.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whether the process is still alive. Reaps it if it has exited.
    pub fn is_running(&mut self) -> bool {
        if self.exited {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::info!(role = %self.role, pid = self.pid, %status, "Process exited");
                self.exited = true;
                false
            }
            Err(e) => {
                tracing::warn!(role = %self.role, pid = self.pid, error = %e, "Failed to query process");
                false
            }
        }
    }
}

/// How a [`ProcessSupervisor::stop`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process had already exited; nothing was signalled.
    AlreadyStopped,
    /// The process exited within the grace period.
    Terminated,
    /// The process was force-killed after the grace period.
    Killed,
}

/// Launches and stops managed processes.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    log_dir: PathBuf,
    log_max_bytes: u64,
}

impl ProcessSupervisor {
    /// Create a supervisor writing logs under `log_dir`.
    pub fn new(log_dir: impl Into<PathBuf>, log_max_bytes: u64) -> Self {
        Self {
            log_dir: log_dir.into(),
            log_max_bytes,
        }
    }

    /// Directory holding process logs.
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Launch a process.
    ///
    /// # Errors
    ///
    /// Returns `ProcessLaunchFailure` if the log files cannot be opened or the
    /// process cannot be spawned.
    pub fn start(&self, spec: &LaunchSpec) -> Result<ProcessHandle> {
        let launch_err = |reason: String| AgentError::ProcessLaunchFailure {
            role: spec.role.clone(),
            reason,
        };

        std::fs::create_dir_all(&self.log_dir)
            .map_err(|e| launch_err(format!("log dir {}: {e}", self.log_dir.display())))?;
        let stdout = self
            .open_log(&format!("{}.out.log", spec.role))
            .map_err(|e| launch_err(format!("stdout log: {e}")))?;
        let stderr = self
            .open_log(&format!("{}.err.log", spec.role))
            .map_err(|e| launch_err(format!("stderr log: {e}")))?;

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| launch_err(e.to_string()))?;

        let Some(pid) = child.id() else {
            let _ = child.start_kill();
            return Err(launch_err("exited before a pid was assigned".to_string()));
        };

        tracing::info!(role = %spec.role, pid, program = %spec.program, "Process started");

        Ok(ProcessHandle {
            role: spec.role.clone(),
            pid,
            started_at: Utc::now(),
            child,
            exited: false,
        })
    }

    /// Stop a process: SIGTERM, wait up to `timeout`, then SIGKILL.
    ///
    /// Stopping a process that has already exited sends nothing.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the forced kill cannot be awaited.
    pub async fn stop(&self, handle: &mut ProcessHandle, timeout: Duration) -> Result<StopOutcome> {
        if !handle.is_running() {
            return Ok(StopOutcome::AlreadyStopped);
        }

        match i32::try_from(handle.pid) {
            Ok(raw) => {
                if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                    tracing::debug!(role = %handle.role, pid = handle.pid, error = %e, "SIGTERM failed");
                }
            }
            Err(_) => tracing::warn!(pid = handle.pid, "Pid out of range, skipping SIGTERM"),
        }

        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
            if !handle.is_running() {
                tracing::info!(role = %handle.role, pid = handle.pid, "Process terminated");
                return Ok(StopOutcome::Terminated);
            }
        }

        tracing::warn!(
            role = %handle.role,
            pid = handle.pid,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "Process ignored SIGTERM, killing"
        );
        if let Err(e) = handle.child.start_kill() {
            tracing::debug!(role = %handle.role, error = %e, "SIGKILL failed");
        }
        handle.child.wait().await?;
        handle.exited = true;

        Ok(StopOutcome::Killed)
    }

    /// Copy each oversized log of `role` to `<file>.1` and truncate it.
    ///
    /// Children write in append mode, so output continues at the new end of
    /// the truncated file. Returns how many logs were trimmed.
    ///
    /// # Errors
    ///
    /// Returns `Io` if a log cannot be copied or truncated.
    pub fn trim_logs(&self, role: &str) -> Result<usize> {
        let mut trimmed = 0;
        for file_name in [format!("{role}.out.log"), format!("{role}.err.log")] {
            let path = self.log_dir.join(file_name);
            if copy_truncate_if_large(&path, self.log_max_bytes)? {
                tracing::info!(role, path = %path.display(), "Trimmed log");
                trimmed += 1;
            }
        }
        Ok(trimmed)
    }

    fn open_log(&self, file_name: &str) -> std::io::Result<std::fs::File> {
        let path = self.log_dir.join(file_name);
        rotate_if_large(&path, self.log_max_bytes)?;
        OpenOptions::new().create(true).append(true).open(path)
    }
}

/// Move `path` to `<path>.1` once it exceeds `max_bytes`.
fn rotate_if_large(path: &Path, max_bytes: u64) -> std::io::Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > max_bytes => std::fs::rename(path, rotated_path(path)),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Copy `path` to `<path>.1` and empty it once it exceeds `max_bytes`.
fn copy_truncate_if_large(path: &Path, max_bytes: u64) -> std::io::Result<bool> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > max_bytes => {
            std::fs::copy(path, rotated_path(path))?;
            OpenOptions::new().write(true).open(path)?.set_len(0)?;
            Ok(true)
        }
        Ok(_) => Ok(false),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn rotated_path(path: &Path) -> PathBuf {
    let mut rotated = path.as_os_str().to_owned();
    rotated.push(".1");
    PathBuf::from(rotated)
}
