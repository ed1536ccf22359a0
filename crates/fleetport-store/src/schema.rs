//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary agent records, keyed by `agent_id`.
    pub const AGENTS: &str = "agents";

    /// Index: agent name to `agent_id`, enforces name uniqueness.
    pub const AGENTS_BY_NAME: &str = "agents_by_name";

    /// Primary allocation records, keyed by `allocation_id`.
    pub const ALLOCATIONS: &str = "allocations";

    /// Index: allocations by agent, keyed by `agent_id || allocation_id`.
    pub const ALLOCATIONS_BY_AGENT: &str = "allocations_by_agent";

    /// Index: allocations by status, keyed by `status || allocation_id`.
    pub const ALLOCATIONS_BY_STATUS: &str = "allocations_by_status";

    /// Primary task records, keyed by `task_id`.
    pub const TASKS: &str = "tasks";

    /// Index: tasks by agent, keyed by `agent_id || task_id`.
    pub const TASKS_BY_AGENT: &str = "tasks_by_agent";

    /// Append-only audit entries, keyed by `audit_id`.
    pub const AUDIT_LOG: &str = "audit_log";

    /// Operator accounts, keyed by `user_id`.
    pub const USERS: &str = "users";

    /// Index: username to `user_id`.
    pub const USERS_BY_NAME: &str = "users_by_name";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::AGENTS,
        cf::AGENTS_BY_NAME,
        cf::ALLOCATIONS,
        cf::ALLOCATIONS_BY_AGENT,
        cf::ALLOCATIONS_BY_STATUS,
        cf::TASKS,
        cf::TASKS_BY_AGENT,
        cf::AUDIT_LOG,
        cf::USERS,
        cf::USERS_BY_NAME,
    ]
}
