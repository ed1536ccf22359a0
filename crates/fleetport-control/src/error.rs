//! Error types for the control plane.
//!
//! This module defines all errors that can occur during agent registration,
//! port allocation, and task dispatch.

use fleetport_core::{AgentId, AllocationId, TaskId};
use fleetport_store::AllocationStatus;
use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in control plane operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A secret, token, or password was rejected.
    #[error("authentication failed")]
    AuthenticationFailure,

    /// No port is free in the configured range.
    #[error("no free port in range {min}-{max}")]
    ResourceExhausted {
        /// Lower bound of the pool.
        min: u16,
        /// Upper bound of the pool.
        max: u16,
    },

    /// The port-allocation lock could not be acquired in time.
    #[error("port lock unavailable: {0}")]
    LockUnavailable(String),

    /// The requested agent was not found.
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    /// The requested allocation was not found.
    #[error("allocation not found: {0}")]
    AllocationNotFound(AllocationId),

    /// The requested task was not found (or belongs to another agent).
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The allocation is in a state that does not permit the operation.
    #[error("allocation {allocation_id} is {status:?}")]
    InvalidState {
        /// The allocation being operated on.
        allocation_id: AllocationId,
        /// Its current status.
        status: AllocationStatus,
    },

    /// The requested state transition is not valid.
    #[error(
        "invalid state transition for allocation {allocation_id}: cannot transition from {from:?} to {to:?}"
    )]
    InvalidTransition {
        /// The allocation being transitioned.
        allocation_id: AllocationId,
        /// The current state.
        from: AllocationStatus,
        /// The requested target state.
        to: AllocationStatus,
    },

    /// A unique name is already taken.
    #[error("name already exists: {0}")]
    DuplicateName(String),

    /// The request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] fleetport_store::StoreError),

    /// Authentication error.
    #[error("authentication error: {0}")]
    Auth(#[from] fleetport_auth::AuthError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::AuthenticationFailure => 401,
            Self::AgentNotFound(_) | Self::AllocationNotFound(_) | Self::TaskNotFound(_) => 404,
            Self::ResourceExhausted { .. }
            | Self::InvalidState { .. }
            | Self::InvalidTransition { .. }
            | Self::DuplicateName(_) => 409,
            Self::InvalidRequest(_) => 400,
            Self::LockUnavailable(_) => 503,
            Self::Auth(err) => err.http_status_code(),
            Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::LockUnavailable(_) | Self::Store(_) | Self::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        assert_eq!(ControlError::AuthenticationFailure.http_status_code(), 401);
        assert_eq!(
            ControlError::AgentNotFound(AgentId::new(1)).http_status_code(),
            404
        );
        assert_eq!(
            ControlError::TaskNotFound(TaskId::new(1)).http_status_code(),
            404
        );
        assert_eq!(
            ControlError::ResourceExhausted {
                min: 50000,
                max: 60000
            }
            .http_status_code(),
            409
        );
        assert_eq!(
            ControlError::InvalidState {
                allocation_id: AllocationId::new(1),
                status: AllocationStatus::Requested,
            }
            .http_status_code(),
            409
        );
        assert_eq!(
            ControlError::LockUnavailable("timeout".into()).http_status_code(),
            503
        );
        assert_eq!(
            ControlError::InvalidRequest("bad".into()).http_status_code(),
            400
        );
    }

    #[test]
    fn retriable_errors() {
        assert!(ControlError::LockUnavailable("timeout".into()).is_retriable());
        assert!(!ControlError::AuthenticationFailure.is_retriable());
        assert!(!ControlError::ResourceExhausted { min: 1, max: 2 }.is_retriable());
    }
}
