//! HTTP request handlers.
//!
//! Operator endpoints take an [`AdminUser`](crate::auth::AdminUser); agent
//! endpoints take an [`AgentAuth`](crate::auth::AgentAuth).

use std::str::FromStr;

use crate::error::ApiError;

pub mod agents;
pub mod allocations;
pub mod audit;
pub mod auth;
pub mod health;
pub mod tasks;

/// Parse a numeric path parameter.
fn parse_id<T: FromStr>(kind: &str, s: &str) -> Result<T, ApiError> {
    s.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid {kind} ID: {s}")))
}
