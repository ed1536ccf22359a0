//! Wire protocol between the control plane and agents.
//!
//! Agents sit behind NAT and pull work: they register with an invite secret,
//! send heartbeats, poll for tasks, and report task outcomes. The types in this
//! module are the JSON bodies of those calls and the typed views of the task
//! payloads the control plane enqueues.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{AgentId, AllocationId, TaskId};

// =============================================================================
// Task kinds and statuses
// =============================================================================

/// The recognized task types.
///
/// On the wire a task type is a free-form string tag so older agents can skip
/// kinds they do not understand; [`TaskKind::from_str`] fails for unknown tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Launch the workload process and its tunnel.
    StartCodeServer,
    /// Stop the tunnel and the workload process.
    StopCodeServer,
}

impl TaskKind {
    /// The wire tag for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartCodeServer => "start_code_server",
            Self::StopCodeServer => "stop_code_server",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start_code_server" => Ok(Self::StartCodeServer),
            "stop_code_server" => Ok(Self::StopCodeServer),
            other => Err(CoreError::UnknownTaskKind(other.to_string())),
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskStatus {
    /// Created, not yet served to the agent.
    Pending = 1,
    /// Served to the agent at least once, no report yet.
    Dispatched = 2,
    /// The agent reported success.
    Done = 3,
    /// The agent reported failure.
    Failed = 4,
}

impl TaskStatus {
    /// Convert the status to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true once the task has a final outcome and can no longer change.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Outcome an agent reports for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskReportStatus {
    /// The task's side effects completed.
    Done,
    /// The task could not be carried out.
    Failed,
}

impl From<TaskReportStatus> for TaskStatus {
    fn from(status: TaskReportStatus) -> Self {
        match status {
            TaskReportStatus::Done => Self::Done,
            TaskReportStatus::Failed => Self::Failed,
        }
    }
}

// =============================================================================
// Task payloads
// =============================================================================

/// Where the agent's tunnel client should connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelEndpoint {
    /// Tunnel server host.
    pub server_addr: String,
    /// Tunnel server control port.
    pub server_port: u16,
    /// Shared token the tunnel server expects.
    pub token: String,
}

/// Payload of a `start_code_server` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartWorkloadPayload {
    /// Allocation this task provisions.
    pub allocation_id: AllocationId,
    /// Externally routable port reserved for the allocation.
    pub remote_port: u16,
    /// Access password generated for this allocation.
    pub password: String,
    /// Service name the allocation was requested for.
    #[serde(default = "default_service")]
    pub service: String,
    /// Tunnel server settings assigned by the control plane, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<TunnelEndpoint>,
}

fn default_service() -> String {
    "code_server".to_string()
}

/// Payload of a `stop_code_server` task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopWorkloadPayload {
    /// Allocation this task tears down.
    pub allocation_id: AllocationId,
    /// Port the allocation held.
    pub remote_port: u16,
}

// =============================================================================
// Agent-facing request/response bodies
// =============================================================================

/// Registration exchange: invite secret for an agent token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Name the invite was created for.
    pub name: String,
    /// Invite secret.
    pub secret: String,
}

/// Successful registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Identifier of the registered agent.
    pub agent_id: AgentId,
    /// Composite bearer token (`<agent_id>:<raw>`).
    pub agent_token: String,
}

/// Periodic liveness report with optional resource metrics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// CPU utilisation in percent.
    #[serde(default)]
    pub cpu: Option<f32>,
    /// Memory utilisation in percent.
    #[serde(default)]
    pub mem: Option<f32>,
}

/// A task as served to a polling agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    /// Task identifier.
    pub id: TaskId,
    /// Task type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Current status.
    pub status: TaskStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl TaskView {
    /// Decode the payload as the given type.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPayload` if the payload does not match.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, CoreError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| CoreError::InvalidPayload(e.to_string()))
    }
}

/// Completion report for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReportRequest {
    /// Outcome.
    pub status: TaskReportStatus,
    /// Free-form detail (error message on failure).
    #[serde(default)]
    pub message: Option<String>,
}

/// Generic acknowledgement body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OkResponse {
    /// Always true on success.
    pub ok: bool,
}

impl OkResponse {
    /// The success acknowledgement.
    pub const OK: Self = Self { ok: true };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_kind_tags() {
        assert_eq!(
            "start_code_server".parse::<TaskKind>().unwrap(),
            TaskKind::StartCodeServer
        );
        assert_eq!(
            "stop_code_server".parse::<TaskKind>().unwrap(),
            TaskKind::StopCodeServer
        );
        assert!(matches!(
            "reboot".parse::<TaskKind>(),
            Err(CoreError::UnknownTaskKind(tag)) if tag == "reboot"
        ));
    }

    #[test]
    fn task_view_uses_type_field() {
        let view: TaskView = serde_json::from_value(json!({
            "id": 3,
            "type": "stop_code_server",
            "payload": {"allocation_id": 5, "remote_port": 50001},
            "status": "dispatched",
            "created_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(view.kind, "stop_code_server");
        assert_eq!(view.status, TaskStatus::Dispatched);

        let payload: StopWorkloadPayload = view.payload_as().unwrap();
        assert_eq!(payload.allocation_id, AllocationId::new(5));
        assert_eq!(payload.remote_port, 50001);
    }

    #[test]
    fn start_payload_defaults() {
        let payload: StartWorkloadPayload = serde_json::from_value(json!({
            "allocation_id": 1,
            "remote_port": 50000,
            "password": "pw"
        }))
        .unwrap();
        assert_eq!(payload.service, "code_server");
        assert!(payload.tunnel.is_none());

        let encoded = serde_json::to_value(&payload).unwrap();
        assert!(encoded.get("tunnel").is_none());
    }

    #[test]
    fn mismatched_payload_is_rejected() {
        let view = TaskView {
            id: TaskId::new(1),
            kind: "start_code_server".to_string(),
            payload: json!({"remote_port": "nope"}),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
        };
        assert!(view.payload_as::<StartWorkloadPayload>().is_err());
    }

    #[test]
    fn report_status_maps_to_task_status() {
        assert_eq!(TaskStatus::from(TaskReportStatus::Done), TaskStatus::Done);
        assert_eq!(TaskStatus::from(TaskReportStatus::Failed), TaskStatus::Failed);
        assert!(TaskStatus::Done.is_finished());
        assert!(!TaskStatus::Dispatched.is_finished());
    }
}
