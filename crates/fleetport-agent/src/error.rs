//! Error types for the agent runtime.

use thiserror::Error;

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur in the agent runtime.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The control plane could not be reached or answered with a non-auth error.
    #[error("control plane request failed: {0}")]
    TransientNetwork(String),

    /// The control plane rejected our credentials, even after re-registering.
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    /// A child process could not be started.
    #[error("failed to launch {role}: {reason}")]
    ProcessLaunchFailure {
        /// Managed role (`workload` or `tunnel`).
        role: String,
        /// Underlying cause.
        reason: String,
    },

    /// A managed process is not healthy.
    #[error("health check failed: {0}")]
    HealthCheckFailure(String),

    /// A task payload could not be decoded.
    #[error("invalid task payload: {0}")]
    InvalidPayload(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The credentials file could not be written.
    #[error("credentials error: {0}")]
    Credentials(String),

    /// Filesystem or process I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Whether the next loop iteration is expected to fix this on its own.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::HealthCheckFailure(_))
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::TransientNetwork(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(AgentError::TransientNetwork("timeout".into()).is_transient());
        assert!(AgentError::HealthCheckFailure("port closed".into()).is_transient());
        assert!(!AgentError::AuthenticationFailure("rejected".into()).is_transient());
        assert!(!AgentError::Config("missing".into()).is_transient());
    }

    #[test]
    fn launch_failure_names_role() {
        let err = AgentError::ProcessLaunchFailure {
            role: "tunnel".to_string(),
            reason: "No such file or directory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to launch tunnel: No such file or directory"
        );
    }
}
