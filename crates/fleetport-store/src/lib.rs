//! `RocksDB` storage layer for fleetport.
//!
//! This crate provides persistent storage for agents, allocations, tasks, audit
//! entries, and operator accounts using `RocksDB` with column families for
//! efficient indexing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `agents` / `agents_by_name`: Agent records and the unique name index
//! - `allocations`: Allocation records, keyed by `allocation_id`
//! - `allocations_by_agent`: Index for listing allocations by agent
//! - `allocations_by_status`: Index for finding port-holding allocations
//! - `tasks` / `tasks_by_agent`: Task records and the per-agent queue index
//! - `audit_log`: Append-only audit entries
//! - `users` / `users_by_name`: Operator accounts
//!
//! # Example
//!
//! ```no_run
//! use fleetport_store::{RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/fleetport-db").unwrap();
//!
//! // Ports currently reserved by non-terminal allocations
//! let held = store.held_ports().unwrap();
//! println!("{} ports in use", held.len());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

use std::collections::BTreeSet;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{
    ActorType, Agent, AgentStatus, Allocation, AllocationStatus, AuditEntry, Task, User,
};

use fleetport_core::{AgentId, AllocationId, TaskId, UserId};

/// Monotonic ID sequences, one per record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    /// Agent IDs.
    Agent,
    /// Allocation IDs.
    Allocation,
    /// Task IDs.
    Task,
    /// Audit entry IDs.
    Audit,
    /// User IDs.
    User,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing). Every method is a short, synchronous
/// read or atomic batch write.
pub trait Store: Send + Sync {
    /// Reserve the next ID in a sequence. IDs start at 1 and are never reused.
    ///
    /// # Errors
    ///
    /// Returns an error if the sequence cannot be read.
    fn next_id(&self, sequence: Sequence) -> Result<u64>;

    // =========================================================================
    // Agent Operations
    // =========================================================================

    /// Insert a new agent, claiming its name.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if another agent already has the name.
    fn insert_agent(&self, agent: &Agent) -> Result<()>;

    /// Update an existing agent record. The name must not change.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_agent(&self, agent: &Agent) -> Result<()>;

    /// Read-modify-write an agent with no other row write in between.
    ///
    /// `apply` returns `false` to leave the stored record untouched. Returns
    /// the record as stored afterwards, or `None` if the agent does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn update_agent(
        &self,
        agent_id: AgentId,
        apply: &mut dyn FnMut(&mut Agent) -> bool,
    ) -> Result<Option<Agent>>;

    /// Get an agent by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_agent(&self, agent_id: AgentId) -> Result<Option<Agent>>;

    /// Get an agent by its unique name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_agent_by_name(&self, name: &str) -> Result<Option<Agent>>;

    /// Delete an agent and release its name.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the agent doesn't exist.
    fn delete_agent(&self, agent_id: AgentId) -> Result<()>;

    /// List all agents ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_agents(&self) -> Result<Vec<Agent>>;

    // =========================================================================
    // Allocation Operations
    // =========================================================================

    /// Insert or update an allocation.
    ///
    /// This also maintains the agent and status indexes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_allocation(&self, allocation: &Allocation) -> Result<()>;

    /// Get an allocation by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_allocation(&self, allocation_id: AllocationId) -> Result<Option<Allocation>>;

    /// List all allocations ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_allocations(&self) -> Result<Vec<Allocation>>;

    /// List the allocations of one agent ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_allocations_by_agent(&self, agent_id: AgentId) -> Result<Vec<Allocation>>;

    /// List allocations with a given status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_allocations_by_status(&self, status: AllocationStatus) -> Result<Vec<Allocation>>;

    /// Ports held by allocations in a port-holding status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn held_ports(&self) -> Result<BTreeSet<u16>> {
        let mut ports = BTreeSet::new();
        for status in AllocationStatus::HOLDING {
            for allocation in self.list_allocations_by_status(status)? {
                ports.insert(allocation.remote_port);
            }
        }
        Ok(ports)
    }

    // =========================================================================
    // Task Operations
    // =========================================================================

    /// Insert or update a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_task(&self, task: &Task) -> Result<()>;

    /// Read-modify-write a task with no other row write in between.
    ///
    /// `apply` returns `false` to leave the stored record untouched. Returns
    /// the record as stored afterwards, or `None` if the task does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn update_task(
        &self,
        task_id: TaskId,
        apply: &mut dyn FnMut(&mut Task) -> bool,
    ) -> Result<Option<Task>>;

    /// Get a task by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_task(&self, task_id: TaskId) -> Result<Option<Task>>;

    /// List the tasks of one agent ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_tasks_by_agent(&self, agent_id: AgentId) -> Result<Vec<Task>>;

    /// Delete every task of an agent, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete_tasks_by_agent(&self, agent_id: AgentId) -> Result<usize>;

    // =========================================================================
    // Audit Operations
    // =========================================================================

    /// Append an audit entry. Existing entries are never overwritten.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if an entry with the same ID exists.
    fn append_audit(&self, entry: &AuditEntry) -> Result<()>;

    /// List the newest audit entries first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_audit(&self, limit: usize) -> Result<Vec<AuditEntry>>;

    // =========================================================================
    // User Operations
    // =========================================================================

    /// Insert a new user, claiming the username.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the username is taken.
    fn insert_user(&self, user: &User) -> Result<()>;

    /// Get a user by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_user(&self, user_id: UserId) -> Result<Option<User>>;

    /// Get a user by username.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_user_by_name(&self, username: &str) -> Result<Option<User>>;
}
