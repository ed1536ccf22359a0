//! Agent registry endpoints.
//!
//! Invites, listing and removal are operator actions. Registration and
//! heartbeats come from the agents themselves.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use fleetport_auth::JwtValidator;
use fleetport_control::{AgentId, ControlPlane};
use fleetport_core::{HeartbeatRequest, OkResponse, RegisterRequest};

use crate::auth::{AdminUser, AgentAuth, ClientIp};
use crate::error::ApiError;
use crate::state::GatewayState;

use super::parse_id;

// =============================================================================
// Request Types
// =============================================================================

/// Request to invite an agent.
#[derive(Debug, Deserialize)]
pub struct InviteBody {
    /// Unique agent name.
    pub name: String,
}

// =============================================================================
// Operator Handlers
// =============================================================================

/// Invite an agent by name. The secret in the response is shown only once.
///
/// # Errors
///
/// Returns an error if the name is invalid or already taken.
pub async fn create_invite<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AdminUser,
    Json(body): Json<InviteBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let invite = state.control.create_invite(user.user_id, &body.name).await?;

    Ok((StatusCode::CREATED, Json(invite)))
}

/// List all agents with their effective liveness.
///
/// # Errors
///
/// Returns an error if the control plane operation fails.
pub async fn list_agents<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    _user: AdminUser,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let agents = state.control.list_agents().await?;

    Ok(Json(agents))
}

/// Remove an agent and everything it owns.
///
/// # Errors
///
/// Returns an error if the agent is not found.
pub async fn remove_agent<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AdminUser,
    Path(agent_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let agent_id: AgentId = parse_id("agent", &agent_id)?;
    state.control.remove_agent(user.user_id, agent_id).await?;

    Ok(Json(OkResponse::OK))
}

// =============================================================================
// Agent Handlers
// =============================================================================

/// Exchange an invite secret for an agent token.
///
/// # Errors
///
/// Returns `401` if the name or secret is wrong.
pub async fn register<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    ClientIp(ip): ClientIp,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let response = state
        .control
        .register_agent(&body.name, &body.secret, ip)
        .await?;

    Ok(Json(response))
}

/// Record a heartbeat from the calling agent.
///
/// # Errors
///
/// Returns an error if the agent vanished since authentication.
pub async fn heartbeat<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    AgentAuth(agent): AgentAuth,
    ClientIp(ip): ClientIp,
    Json(body): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    state.control.heartbeat(agent.agent_id, body, ip).await?;

    Ok(Json(OkResponse::OK))
}
