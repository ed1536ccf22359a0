//! API error types and responses.
//!
//! Every failure leaves the gateway as `{"error":{"code":"...","message":"..."}}`
//! with a stable code per kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use fleetport_auth::AuthError;
use fleetport_control::ControlError;

/// API error type that implements `IntoResponse`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or rejected credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request conflicts with the current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No free port is left in the pool.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The port lock could not be acquired.
    #[error("lock unavailable: {0}")]
    LockUnavailable(String),

    /// Invalid request body or parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

/// Error details.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::ResourceExhausted(_) => StatusCode::CONFLICT,
            Self::LockUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::LockUnavailable(_) => "lock_unavailable",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        let body = ErrorResponse {
            error: ErrorBody { code, message },
        };

        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::TokenExpired
            | AuthError::InvalidSignature
            | AuthError::InvalidIssuer
            | AuthError::InvalidUserId
            | AuthError::InvalidToken(_)
            | AuthError::MalformedAgentToken => Self::Unauthorized,
            AuthError::MalformedHash | AuthError::Internal(_) => {
                tracing::error!(error = %err, "Auth internal error");
                Self::Internal("authentication service error".to_string())
            }
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::AuthenticationFailure => Self::Unauthorized,
            ControlError::ResourceExhausted { min, max } => {
                Self::ResourceExhausted(format!("no free port in range {min}-{max}"))
            }
            ControlError::LockUnavailable(msg) => Self::LockUnavailable(msg),
            ControlError::AgentNotFound(id) => Self::NotFound(format!("agent {id}")),
            ControlError::AllocationNotFound(id) => Self::NotFound(format!("allocation {id}")),
            ControlError::TaskNotFound(id) => Self::NotFound(format!("task {id}")),
            err @ (ControlError::InvalidState { .. }
            | ControlError::InvalidTransition { .. }
            | ControlError::DuplicateName(_)) => Self::Conflict(err.to_string()),
            ControlError::InvalidRequest(msg) => Self::BadRequest(msg),
            ControlError::Auth(auth_err) => Self::from(auth_err),
            ControlError::Store(store_err) => {
                tracing::error!(error = %store_err, "Store error");
                Self::Internal("storage error".to_string())
            }
            ControlError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                Self::Internal(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetport_control::{AllocationId, AllocationStatus};

    #[test]
    fn error_status_codes() {
        assert_eq!(
            ApiError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::ResourceExhausted("full".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::LockUnavailable("down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Internal("test".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn control_errors_keep_their_kind() {
        let exhausted = ApiError::from(ControlError::ResourceExhausted {
            min: 50000,
            max: 50001,
        });
        assert_eq!(exhausted.code(), "resource_exhausted");

        let invalid = ApiError::from(ControlError::InvalidState {
            allocation_id: AllocationId::new(1),
            status: AllocationStatus::Requested,
        });
        assert_eq!(invalid.code(), "conflict");

        assert_eq!(
            ApiError::from(ControlError::AuthenticationFailure).code(),
            "unauthorized"
        );
        assert_eq!(
            ApiError::from(ControlError::LockUnavailable("timeout".into())).code(),
            "lock_unavailable"
        );
        assert_eq!(
            ApiError::from(ControlError::InvalidRequest("empty".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
