//! Agent task queue endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;

use fleetport_auth::JwtValidator;
use fleetport_control::{ControlPlane, TaskId};
use fleetport_core::{OkResponse, TaskReportRequest};

use crate::auth::AgentAuth;
use crate::error::ApiError;
use crate::state::GatewayState;

use super::parse_id;

/// Return every unfinished task for the calling agent.
///
/// Tasks stay visible until reported, so agents must handle repeats.
///
/// # Errors
///
/// Returns an error if the control plane operation fails.
pub async fn poll<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    AgentAuth(agent): AgentAuth,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let tasks = state.control.poll_tasks(agent.agent_id).await?;

    Ok(Json(tasks))
}

/// Report the outcome of one of the calling agent's tasks.
///
/// # Errors
///
/// Returns `404` if the task doesn't exist or belongs to another agent.
pub async fn report<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    AgentAuth(agent): AgentAuth,
    Path(task_id): Path<String>,
    Json(body): Json<TaskReportRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let task_id: TaskId = parse_id("task", &task_id)?;
    state
        .control
        .report_task(agent.agent_id, task_id, body)
        .await?;

    Ok(Json(OkResponse::OK))
}
