//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fleetport_core::{AgentId, AllocationId, TaskId, UserId};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{Agent, Allocation, AllocationStatus, AuditEntry, Task, User};
use crate::{Sequence, Store};

/// Last assigned value of every ID sequence.
#[derive(Default)]
struct Sequences {
    agent: AtomicU64,
    allocation: AtomicU64,
    task: AtomicU64,
    audit: AtomicU64,
    user: AtomicU64,
}

impl Sequences {
    const fn counter(&self, sequence: Sequence) -> &AtomicU64 {
        match sequence {
            Sequence::Agent => &self.agent,
            Sequence::Allocation => &self.allocation,
            Sequence::Task => &self.task,
            Sequence::Audit => &self.audit,
            Sequence::User => &self.user,
        }
    }
}

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    sequences: Sequences,
    // Serializes check-then-insert on the unique name indexes.
    unique_guard: Mutex<()>,
    // Serializes agent and task row writes so updates never lose each other.
    row_guard: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// ID sequences resume after the highest key already present.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let store = Self {
            db: Arc::new(db),
            sequences: Sequences::default(),
            unique_guard: Mutex::new(()),
            row_guard: Mutex::new(()),
        };
        store.seed_sequences()?;

        Ok(store)
    }

    /// Initialise every sequence from the last key of its primary column family.
    fn seed_sequences(&self) -> Result<()> {
        let primaries = [
            (Sequence::Agent, cf::AGENTS),
            (Sequence::Allocation, cf::ALLOCATIONS),
            (Sequence::Task, cf::TASKS),
            (Sequence::Audit, cf::AUDIT_LOG),
            (Sequence::User, cf::USERS),
        ];

        for (sequence, name) in primaries {
            let handle = self.cf(name)?;
            let last = match self.db.iterator_cf(&handle, IteratorMode::End).next() {
                Some(item) => {
                    let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
                    keys::decode_id_key(&key)?
                }
                None => 0,
            };
            self.sequences.counter(sequence).store(last, Ordering::SeqCst);
            tracing::debug!(?sequence, last, "Seeded ID sequence");
        }

        Ok(())
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Read and decode one record from a column family.
    fn get_value<T: serde::de::DeserializeOwned>(&self, name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Write an agent row. Callers hold `row_guard`.
    fn write_agent(&self, agent: &Agent) -> Result<()> {
        let cf = self.cf(cf::AGENTS)?;
        let value = Self::serialize(agent)?;

        self.db
            .put_cf(&cf, keys::id_key(agent.agent_id.get()), value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Write a task row and its by-agent index entry. Callers hold `row_guard`.
    fn write_task(&self, task: &Task) -> Result<()> {
        let cf_tasks = self.cf(cf::TASKS)?;
        let cf_by_agent = self.cf(cf::TASKS_BY_AGENT)?;

        let value = Self::serialize(task)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_tasks, keys::id_key(task.task_id.get()), &value);
        batch.put_cf(
            &cf_by_agent,
            keys::agent_task_key(task.agent_id, task.task_id),
            [],
        );

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Decode every record in a column family, in key order.
    fn list_values<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let cf = self.cf(name)?;

        let mut values = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            values.push(Self::deserialize(&value)?);
        }

        Ok(values)
    }

    /// Collect the trailing IDs of every index key under a prefix.
    fn scan_index(&self, name: &str, prefix: &[u8]) -> Result<Vec<u64>> {
        let cf = self.cf(name)?;

        let mut ids = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            // Stop if we're past the prefix
            if !key.starts_with(prefix) {
                break;
            }

            ids.push(keys::trailing_id(&key)?);
        }

        Ok(ids)
    }
}

impl Store for RocksStore {
    fn next_id(&self, sequence: Sequence) -> Result<u64> {
        Ok(self.sequences.counter(sequence).fetch_add(1, Ordering::SeqCst) + 1)
    }

    // =========================================================================
    // Agent Operations
    // =========================================================================

    fn insert_agent(&self, agent: &Agent) -> Result<()> {
        let cf_agents = self.cf(cf::AGENTS)?;
        let cf_by_name = self.cf(cf::AGENTS_BY_NAME)?;

        let name_key = keys::name_key(&agent.name);
        let agent_key = keys::id_key(agent.agent_id.get());
        let value = Self::serialize(agent)?;

        let _guard = self.unique_guard.lock();

        let taken = self
            .db
            .get_cf(&cf_by_name, &name_key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        if taken {
            return Err(StoreError::Conflict(format!(
                "agent name already exists: {}",
                agent.name
            )));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_agents, &agent_key, &value);
        batch.put_cf(&cf_by_name, &name_key, &agent_key);

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn put_agent(&self, agent: &Agent) -> Result<()> {
        let _guard = self.row_guard.lock();
        self.write_agent(agent)
    }

    fn update_agent(
        &self,
        agent_id: AgentId,
        apply: &mut dyn FnMut(&mut Agent) -> bool,
    ) -> Result<Option<Agent>> {
        let _guard = self.row_guard.lock();
        let Some(mut agent) = self.get_agent(agent_id)? else {
            return Ok(None);
        };
        if apply(&mut agent) {
            self.write_agent(&agent)?;
        }
        Ok(Some(agent))
    }

    fn get_agent(&self, agent_id: AgentId) -> Result<Option<Agent>> {
        self.get_value(cf::AGENTS, &keys::id_key(agent_id.get()))
    }

    fn get_agent_by_name(&self, name: &str) -> Result<Option<Agent>> {
        let cf_by_name = self.cf(cf::AGENTS_BY_NAME)?;

        let Some(id_bytes) = self
            .db
            .get_cf(&cf_by_name, keys::name_key(name))
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        self.get_value(cf::AGENTS, &id_bytes)
    }

    fn delete_agent(&self, agent_id: AgentId) -> Result<()> {
        let cf_agents = self.cf(cf::AGENTS)?;
        let cf_by_name = self.cf(cf::AGENTS_BY_NAME)?;

        let _guard = self.row_guard.lock();
        // Get the agent to find its name
        let agent = self.get_agent(agent_id)?.ok_or(StoreError::NotFound)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_agents, keys::id_key(agent_id.get()));
        batch.delete_cf(&cf_by_name, keys::name_key(&agent.name));

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn list_agents(&self) -> Result<Vec<Agent>> {
        self.list_values(cf::AGENTS)
    }

    // =========================================================================
    // Allocation Operations
    // =========================================================================

    fn put_allocation(&self, allocation: &Allocation) -> Result<()> {
        let cf_allocations = self.cf(cf::ALLOCATIONS)?;
        let cf_by_agent = self.cf(cf::ALLOCATIONS_BY_AGENT)?;
        let cf_by_status = self.cf(cf::ALLOCATIONS_BY_STATUS)?;

        let id = allocation.allocation_id;
        let allocation_key = keys::id_key(id.get());
        let agent_key = keys::agent_allocation_key(allocation.agent_id, id);
        let status_key = keys::status_allocation_key(allocation.status.as_u8(), id);
        let value = Self::serialize(allocation)?;

        // Check if the allocation exists to handle status index updates
        let old_status = self
            .get_value::<Allocation>(cf::ALLOCATIONS, &allocation_key)?
            .map(|a| a.status);

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_allocations, &allocation_key, &value);
        batch.put_cf(&cf_by_agent, &agent_key, []);

        if let Some(old) = old_status {
            if old != allocation.status {
                batch.delete_cf(&cf_by_status, keys::status_allocation_key(old.as_u8(), id));
            }
        }
        batch.put_cf(&cf_by_status, &status_key, []);

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_allocation(&self, allocation_id: AllocationId) -> Result<Option<Allocation>> {
        self.get_value(cf::ALLOCATIONS, &keys::id_key(allocation_id.get()))
    }

    fn list_allocations(&self) -> Result<Vec<Allocation>> {
        self.list_values(cf::ALLOCATIONS)
    }

    fn list_allocations_by_agent(&self, agent_id: AgentId) -> Result<Vec<Allocation>> {
        let ids = self.scan_index(cf::ALLOCATIONS_BY_AGENT, &keys::agent_prefix(agent_id))?;

        let mut allocations = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(allocation) = self.get_allocation(AllocationId::new(id))? {
                allocations.push(allocation);
            }
        }

        Ok(allocations)
    }

    fn list_allocations_by_status(&self, status: AllocationStatus) -> Result<Vec<Allocation>> {
        let ids = self.scan_index(
            cf::ALLOCATIONS_BY_STATUS,
            &keys::status_prefix(status.as_u8()),
        )?;

        let mut allocations = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(allocation) = self.get_allocation(AllocationId::new(id))? {
                allocations.push(allocation);
            }
        }

        Ok(allocations)
    }

    // =========================================================================
    // Task Operations
    // =========================================================================

    fn put_task(&self, task: &Task) -> Result<()> {
        let _guard = self.row_guard.lock();
        self.write_task(task)
    }

    fn update_task(
        &self,
        task_id: TaskId,
        apply: &mut dyn FnMut(&mut Task) -> bool,
    ) -> Result<Option<Task>> {
        let _guard = self.row_guard.lock();
        let Some(mut task) = self.get_task(task_id)? else {
            return Ok(None);
        };
        if apply(&mut task) {
            self.write_task(&task)?;
        }
        Ok(Some(task))
    }

    fn get_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        self.get_value(cf::TASKS, &keys::id_key(task_id.get()))
    }

    fn list_tasks_by_agent(&self, agent_id: AgentId) -> Result<Vec<Task>> {
        let ids = self.scan_index(cf::TASKS_BY_AGENT, &keys::agent_prefix(agent_id))?;

        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(task) = self.get_task(TaskId::new(id))? {
                tasks.push(task);
            }
        }

        Ok(tasks)
    }

    fn delete_tasks_by_agent(&self, agent_id: AgentId) -> Result<usize> {
        let _guard = self.row_guard.lock();
        let cf_tasks = self.cf(cf::TASKS)?;
        let cf_by_agent = self.cf(cf::TASKS_BY_AGENT)?;

        let ids = self.scan_index(cf::TASKS_BY_AGENT, &keys::agent_prefix(agent_id))?;

        let mut batch = WriteBatch::default();
        for id in &ids {
            let task_id = TaskId::new(*id);
            batch.delete_cf(&cf_tasks, keys::id_key(*id));
            batch.delete_cf(&cf_by_agent, keys::agent_task_key(agent_id, task_id));
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(ids.len())
    }

    // =========================================================================
    // Audit Operations
    // =========================================================================

    fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let cf = self.cf(cf::AUDIT_LOG)?;
        let key = keys::id_key(entry.audit_id.get());
        let value = Self::serialize(entry)?;

        let _guard = self.unique_guard.lock();

        let exists = self
            .db
            .get_cf(&cf, &key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        if exists {
            return Err(StoreError::Conflict(format!(
                "audit entry already exists: {}",
                entry.audit_id
            )));
        }

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn list_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let cf = self.cf(cf::AUDIT_LOG)?;

        let mut entries = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::End).take(limit) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            entries.push(Self::deserialize(&value)?);
        }

        Ok(entries)
    }

    // =========================================================================
    // User Operations
    // =========================================================================

    fn insert_user(&self, user: &User) -> Result<()> {
        let cf_users = self.cf(cf::USERS)?;
        let cf_by_name = self.cf(cf::USERS_BY_NAME)?;

        let name_key = keys::name_key(&user.username);
        let user_key = keys::id_key(user.user_id.get());
        let value = Self::serialize(user)?;

        let _guard = self.unique_guard.lock();

        let taken = self
            .db
            .get_cf(&cf_by_name, &name_key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        if taken {
            return Err(StoreError::Conflict(format!(
                "username already exists: {}",
                user.username
            )));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_users, &user_key, &value);
        batch.put_cf(&cf_by_name, &name_key, &user_key);

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        self.get_value(cf::USERS, &keys::id_key(user_id.get()))
    }

    fn get_user_by_name(&self, username: &str) -> Result<Option<User>> {
        let cf_by_name = self.cf(cf::USERS_BY_NAME)?;

        let Some(id_bytes) = self
            .db
            .get_cf(&cf_by_name, keys::name_key(username))
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        self.get_value(cf::USERS, &id_bytes)
    }
}
