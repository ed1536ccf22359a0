//! Common error types for fleetport.
//!
//! This module provides shared error types that are used across multiple crates.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout the fleetport system.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// A task payload did not match the shape its kind requires.
    #[error("invalid task payload: {0}")]
    InvalidPayload(String),

    /// An unknown task type tag was encountered.
    #[error("unknown task type: {0}")]
    UnknownTaskKind(String),
}
