//! Domain types stored in the database.
//!
//! These types represent the persisted state of agents, allocations, tasks,
//! audit entries, and operator accounts.

use chrono::{DateTime, Utc};
use fleetport_core::{AgentId, AllocationId, AuditId, TaskId, TaskKind, TaskStatus, UserId};
use serde::{Deserialize, Serialize};

/// An agent (compute node) record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier for the agent.
    pub agent_id: AgentId,
    /// Unique human-readable name the invite was issued for.
    pub name: String,
    /// Hash of the invite secret.
    pub secret_hash: String,
    /// Hash of the currently issued token; `None` until the agent registers.
    #[serde(default)]
    pub token_hash: Option<String>,
    /// Stored liveness status.
    pub status: AgentStatus,
    /// Last time the agent registered or sent a heartbeat.
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Last reported source IP.
    #[serde(default)]
    pub ip: Option<String>,
    /// Last reported CPU utilisation in percent.
    #[serde(default)]
    pub cpu_percent: Option<f32>,
    /// Last reported memory utilisation in percent.
    #[serde(default)]
    pub mem_percent: Option<f32>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Liveness status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Heartbeats are arriving.
    Online,
    /// Never registered, or heartbeats stopped.
    Offline,
}

/// A reserved external port bound to one agent for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    /// Unique identifier.
    pub allocation_id: AllocationId,
    /// Agent hosting the workload.
    pub agent_id: AgentId,
    /// Operator who requested the allocation.
    pub user_id: UserId,
    /// Service name.
    pub service: String,
    /// Exclusively reserved remote port while the allocation holds it.
    pub remote_port: u16,
    /// Lifecycle status.
    pub status: AllocationStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// Set when the allocation reaches `Released`.
    #[serde(default)]
    pub released_at: Option<DateTime<Utc>>,
    /// Set when the allocation reaches `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Lifecycle states for an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AllocationStatus {
    /// Port reserved, start task enqueued.
    Requested = 1,
    /// Workload start in progress.
    Starting = 2,
    /// Workload running and reachable.
    Active = 3,
    /// Stop task enqueued.
    Releasing = 4,
    /// Workload stopped, port returned to the pool.
    Released = 5,
    /// A task failed; port returned to the pool.
    Failed = 6,
}

impl AllocationStatus {
    /// Statuses whose allocations exclusively hold their port.
    pub const HOLDING: [Self; 3] = [Self::Requested, Self::Starting, Self::Active];

    /// Convert the state to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to an `AllocationStatus`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Requested),
            2 => Some(Self::Starting),
            3 => Some(Self::Active),
            4 => Some(Self::Releasing),
            5 => Some(Self::Released),
            6 => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns true if an allocation in this state counts against the port pool.
    #[must_use]
    pub const fn holds_port(self) -> bool {
        matches!(self, Self::Requested | Self::Starting | Self::Active)
    }
}

/// One unit of work for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub task_id: TaskId,
    /// Agent the task is addressed to.
    pub agent_id: AgentId,
    /// What the agent should do.
    pub kind: TaskKind,
    /// Kind-specific payload, passed through to the agent as JSON.
    pub payload: serde_json::Value,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Message from the last report.
    #[serde(default)]
    pub last_error: Option<String>,
    /// How many times the task has been served.
    #[serde(default)]
    pub attempts: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// First time the task was served.
    #[serde(default)]
    pub dispatched_at: Option<DateTime<Utc>>,
}

/// Who performed an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// An operator account.
    User,
    /// A registered agent.
    Agent,
    /// The control plane itself.
    System,
}

/// An append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique identifier, assigned in write order.
    pub audit_id: AuditId,
    /// Kind of actor.
    pub actor_type: ActorType,
    /// Actor identifier (user, agent, or `0` for the system).
    pub actor_id: u64,
    /// Action name, e.g. `create_allocation`.
    pub action: String,
    /// Kind of the target record.
    #[serde(default)]
    pub target_type: Option<String>,
    /// Identifier of the target record.
    #[serde(default)]
    pub target_id: Option<u64>,
    /// Free-form structured metadata.
    #[serde(default)]
    pub meta: serde_json::Value,
    /// When the action happened.
    pub created_at: DateTime<Utc>,
}

/// An operator account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier.
    pub user_id: UserId,
    /// Unique login name.
    pub username: String,
    /// Hash of the password.
    pub password_hash: String,
    /// Role name.
    pub role: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_status_roundtrip() {
        for status in [
            AllocationStatus::Requested,
            AllocationStatus::Starting,
            AllocationStatus::Active,
            AllocationStatus::Releasing,
            AllocationStatus::Released,
            AllocationStatus::Failed,
        ] {
            assert_eq!(AllocationStatus::from_u8(status.as_u8()), Some(status));
        }
        assert_eq!(AllocationStatus::from_u8(0), None);
        assert_eq!(AllocationStatus::from_u8(7), None);
    }

    #[test]
    fn port_holding_states() {
        assert!(AllocationStatus::Requested.holds_port());
        assert!(AllocationStatus::Starting.holds_port());
        assert!(AllocationStatus::Active.holds_port());
        assert!(!AllocationStatus::Releasing.holds_port());
        assert!(!AllocationStatus::Released.holds_port());
        assert!(!AllocationStatus::Failed.holds_port());
    }

    #[test]
    fn statuses_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&AllocationStatus::Releasing).unwrap(),
            "\"releasing\""
        );
        assert_eq!(
            serde_json::to_string(&AgentStatus::Online).unwrap(),
            "\"online\""
        );
        assert_eq!(serde_json::to_string(&ActorType::System).unwrap(), "\"system\"");
    }
}
