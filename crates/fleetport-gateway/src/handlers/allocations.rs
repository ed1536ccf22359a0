//! Port allocation endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleetport_auth::JwtValidator;
use fleetport_control::{
    AgentId, Allocation, AllocationId, AllocationStatus, ControlPlane, UserId,
};
use fleetport_core::OkResponse;

use crate::auth::AdminUser;
use crate::error::ApiError;
use crate::state::GatewayState;

use super::parse_id;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to reserve a port on an agent.
#[derive(Debug, Deserialize)]
pub struct CreateAllocationBody {
    /// Agent to host the workload.
    pub agent_id: AgentId,
    /// Service name.
    #[serde(default = "default_service")]
    pub service: String,
}

fn default_service() -> String {
    "code_server".to_string()
}

/// Optional filter for listing allocations.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Only allocations on this agent.
    #[serde(default)]
    pub agent_id: Option<AgentId>,
}

/// An allocation as returned by the API.
#[derive(Debug, Serialize)]
pub struct AllocationResponse {
    /// Allocation ID.
    pub id: AllocationId,
    /// Hosting agent.
    pub agent_id: AgentId,
    /// Requesting operator.
    pub user_id: UserId,
    /// Service name.
    pub service: String,
    /// Reserved remote port.
    pub remote_port: u16,
    /// Lifecycle status.
    pub status: AllocationStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Set once released.
    pub released_at: Option<DateTime<Utc>>,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Public address of the workload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,
}

impl AllocationResponse {
    fn new(allocation: Allocation, access_url: Option<String>) -> Self {
        Self {
            id: allocation.allocation_id,
            agent_id: allocation.agent_id,
            user_id: allocation.user_id,
            service: allocation.service,
            remote_port: allocation.remote_port,
            status: allocation.status,
            created_at: allocation.created_at,
            updated_at: allocation.updated_at,
            released_at: allocation.released_at,
            error_message: allocation.error_message,
            access_url,
        }
    }
}

fn render<C: ControlPlane>(control: &C, allocation: Allocation) -> AllocationResponse {
    let access_url = control.access_url(&allocation);
    AllocationResponse::new(allocation, access_url)
}

// =============================================================================
// Handlers
// =============================================================================

/// Reserve a port and queue the workload start.
///
/// # Errors
///
/// Returns `404` for an unknown agent, `409` when the pool is exhausted,
/// or `503` when the port lock is unavailable.
pub async fn create_allocation<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AdminUser,
    Json(body): Json<CreateAllocationBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let allocation = state
        .control
        .allocate(user.user_id, body.agent_id, &body.service)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(render(&*state.control, allocation)),
    ))
}

/// List allocations, optionally filtered by agent.
///
/// # Errors
///
/// Returns an error if the control plane operation fails.
pub async fn list_allocations<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    _user: AdminUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let allocations = state.control.list_allocations(query.agent_id).await?;

    let response: Vec<AllocationResponse> = allocations
        .into_iter()
        .map(|a| render(&*state.control, a))
        .collect();

    Ok(Json(response))
}

/// Get a single allocation.
///
/// # Errors
///
/// Returns `404` if the allocation doesn't exist.
pub async fn get_allocation<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    _user: AdminUser,
    Path(allocation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let allocation_id: AllocationId = parse_id("allocation", &allocation_id)?;
    let allocation = state.control.get_allocation(allocation_id).await?;

    Ok(Json(render(&*state.control, allocation)))
}

/// Release an active allocation.
///
/// # Errors
///
/// Returns `404` if the allocation doesn't exist, or `409` if its workload
/// has not been acknowledged yet.
pub async fn release_allocation<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AdminUser,
    Path(allocation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let allocation_id: AllocationId = parse_id("allocation", &allocation_id)?;
    state.control.release(user.user_id, allocation_id).await?;

    Ok(Json(OkResponse::OK))
}

/// Port pool statistics.
///
/// # Errors
///
/// Returns an error if the control plane operation fails.
pub async fn port_stats<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    _user: AdminUser,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let stats = state.control.port_stats().await?;

    Ok(Json(stats))
}
