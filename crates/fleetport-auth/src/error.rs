//! Authentication error types.

use thiserror::Error;

/// A result type using `AuthError`.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur during authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The JWT has expired.
    #[error("token expired")]
    TokenExpired,

    /// The JWT signature is invalid.
    #[error("invalid signature")]
    InvalidSignature,

    /// The JWT issuer does not match the expected value.
    #[error("invalid issuer")]
    InvalidIssuer,

    /// The user ID in the token is malformed.
    #[error("invalid user ID format")]
    InvalidUserId,

    /// The token format is invalid.
    #[error("invalid token format: {0}")]
    InvalidToken(String),

    /// The agent token is not of the form `<agent_id>:<secret>`.
    #[error("malformed agent token")]
    MalformedAgentToken,

    /// A stored secret hash could not be parsed.
    #[error("malformed secret hash")]
    MalformedHash,

    /// A password could not be hashed.
    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Returns `true` if this error indicates the client should retry with a new token.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::TokenExpired)
    }

    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::TokenExpired
            | Self::InvalidSignature
            | Self::InvalidIssuer
            | Self::InvalidUserId
            | Self::InvalidToken(_)
            | Self::MalformedAgentToken => 401,
            Self::MalformedHash | Self::PasswordHash(_) | Self::Internal(_) => 500,
        }
    }
}
