//! Append-only audit log.

use chrono::Utc;
use fleetport_core::{AgentId, AllocationId, AuditId, UserId};
use fleetport_store::{ActorType, AuditEntry, Sequence, Store};

use crate::error::Result;

/// Audited action names.
pub mod action {
    /// An operator reserved a port.
    pub const CREATE_ALLOCATION: &str = "create_allocation";
    /// An operator requested release of an allocation.
    pub const RELEASE_ALLOCATION: &str = "release_allocation";
    /// The agent acknowledged a start task.
    pub const ALLOCATION_ACTIVE: &str = "allocation_active";
    /// The agent acknowledged a stop task.
    pub const ALLOCATION_RELEASED: &str = "allocation_released";
    /// A task failed and its allocation moved to `Failed`.
    pub const ALLOCATION_FAILED: &str = "allocation_failed";
    /// An operator invited an agent.
    pub const AGENT_INVITED: &str = "agent_invited";
    /// An agent exchanged its invite secret for a token.
    pub const AGENT_REGISTERED: &str = "agent_registered";
    /// An operator removed an agent.
    pub const AGENT_REMOVED: &str = "agent_removed";
    /// The sweep marked a silent agent offline.
    pub const AGENT_OFFLINE: &str = "agent_offline";
}

/// Who performed an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// An operator.
    User(UserId),
    /// A registered agent.
    Agent(AgentId),
    /// The control plane itself.
    System,
}

impl Actor {
    const fn parts(self) -> (ActorType, u64) {
        match self {
            Self::User(id) => (ActorType::User, id.get()),
            Self::Agent(id) => (ActorType::Agent, id.get()),
            Self::System => (ActorType::System, UserId::SYSTEM.get()),
        }
    }
}

/// What an action was performed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// An allocation.
    Allocation(AllocationId),
    /// An agent.
    Agent(AgentId),
}

impl Target {
    const fn parts(self) -> (&'static str, u64) {
        match self {
            Self::Allocation(id) => ("allocation", id.get()),
            Self::Agent(id) => ("agent", id.get()),
        }
    }
}

/// Append an entry to the audit log.
///
/// # Errors
///
/// Returns a storage error if the entry cannot be written.
pub fn record<S: Store>(
    store: &S,
    actor: Actor,
    action: &str,
    target: Option<Target>,
    meta: serde_json::Value,
) -> Result<AuditEntry> {
    let (actor_type, actor_id) = actor.parts();
    let (target_type, target_id) = match target.map(Target::parts) {
        Some((kind, id)) => (Some(kind.to_string()), Some(id)),
        None => (None, None),
    };

    let entry = AuditEntry {
        audit_id: AuditId::new(store.next_id(Sequence::Audit)?),
        actor_type,
        actor_id,
        action: action.to_string(),
        target_type,
        target_id,
        meta,
        created_at: Utc::now(),
    };
    store.append_audit(&entry)?;

    Ok(entry)
}

/// The newest `limit` entries, newest first.
///
/// # Errors
///
/// Returns a storage error if the log cannot be read.
pub fn list<S: Store>(store: &S, limit: usize) -> Result<Vec<AuditEntry>> {
    Ok(store.list_audit(limit)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetport_store::RocksStore;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn records_actor_and_target() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();

        record(
            &store,
            Actor::User(UserId::new(4)),
            action::CREATE_ALLOCATION,
            Some(Target::Allocation(AllocationId::new(9))),
            json!({"agent_id": 1, "port": 50001}),
        )
        .unwrap();
        record(&store, Actor::System, "sweep", None, json!({})).unwrap();

        let entries = list(&store, 10).unwrap();
        assert_eq!(entries.len(), 2);

        let system = &entries[0];
        assert_eq!(system.actor_type, ActorType::System);
        assert_eq!(system.actor_id, 0);
        assert!(system.target_type.is_none());

        let create = &entries[1];
        assert_eq!(create.actor_type, ActorType::User);
        assert_eq!(create.actor_id, 4);
        assert_eq!(create.action, "create_allocation");
        assert_eq!(create.target_type.as_deref(), Some("allocation"));
        assert_eq!(create.target_id, Some(9));
        assert_eq!(create.meta["port"], 50001);
    }
}
