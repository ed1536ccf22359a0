//! Audit log endpoint.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use fleetport_auth::JwtValidator;
use fleetport_control::ControlPlane;

use crate::auth::AdminUser;
use crate::error::ApiError;
use crate::state::GatewayState;

const MAX_LIMIT: usize = 1000;

/// Query parameters for the audit log.
#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    /// Number of entries to return (default: 100, capped at 1000).
    #[serde(default = "default_limit")]
    pub limit: usize,
}

const fn default_limit() -> usize {
    100
}

/// Return the newest audit entries, newest first.
///
/// # Errors
///
/// Returns an error if the control plane operation fails.
pub async fn list_audit<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    _user: AdminUser,
    Query(query): Query<AuditQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let entries = state
        .control
        .list_audit(query.limit.min(MAX_LIMIT))
        .await?;

    Ok(Json(entries))
}
