//! Health check endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use fleetport_auth::JwtValidator;
use fleetport_control::ControlPlane;

use crate::state::GatewayState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
}

/// Health check handler.
///
/// Public. Reports `degraded` with `503` when the store can't be read.
///
/// ```text
/// GET /health
///
/// Response: 200 OK
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health<C, V>(State(state): State<Arc<GatewayState<C, V>>>) -> impl IntoResponse
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let (code, status) = match state.control.port_stats().await {
        Ok(_) => (StatusCode::OK, "healthy"),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        }
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}
