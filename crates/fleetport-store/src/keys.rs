//! Key encoding utilities for `RocksDB`.
//!
//! IDs are encoded big-endian so iteration order matches numeric order, and
//! composite index keys are plain concatenations that support prefix scans.

use fleetport_core::{AgentId, AllocationId, IdError, TaskId};

/// Length of an encoded numeric ID.
pub const ID_LEN: usize = 8;

/// Encode a numeric primary key.
#[must_use]
pub fn id_key(id: u64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

/// Decode a numeric primary key.
///
/// # Errors
///
/// Returns an error if the key is not exactly 8 bytes.
pub fn decode_id_key(key: &[u8]) -> Result<u64, IdError> {
    let arr: [u8; ID_LEN] = key.try_into().map_err(|_| IdError::InvalidLength {
        expected: ID_LEN,
        got: key.len(),
    })?;
    Ok(u64::from_be_bytes(arr))
}

/// Encode a name index key.
#[must_use]
pub fn name_key(name: &str) -> Vec<u8> {
    name.as_bytes().to_vec()
}

/// Encode an agent prefix for scanning per-agent indexes.
#[must_use]
pub fn agent_prefix(agent_id: AgentId) -> Vec<u8> {
    agent_id.to_be_bytes().to_vec()
}

/// Encode an agent-allocation index key: `agent_id || allocation_id`.
#[must_use]
pub fn agent_allocation_key(agent_id: AgentId, allocation_id: AllocationId) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN * 2);
    key.extend_from_slice(&agent_id.to_be_bytes());
    key.extend_from_slice(&allocation_id.to_be_bytes());
    key
}

/// Encode an agent-task index key: `agent_id || task_id`.
#[must_use]
pub fn agent_task_key(agent_id: AgentId, task_id: TaskId) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN * 2);
    key.extend_from_slice(&agent_id.to_be_bytes());
    key.extend_from_slice(&task_id.to_be_bytes());
    key
}

/// Encode a status-allocation index key: `status || allocation_id`.
#[must_use]
pub fn status_allocation_key(status: u8, allocation_id: AllocationId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + ID_LEN);
    key.push(status);
    key.extend_from_slice(&allocation_id.to_be_bytes());
    key
}

/// Encode a status prefix for scanning allocations by status.
#[must_use]
pub fn status_prefix(status: u8) -> Vec<u8> {
    vec![status]
}

/// Extract the trailing ID from a composite index key.
///
/// # Errors
///
/// Returns an error if the key is shorter than an encoded ID.
pub fn trailing_id(key: &[u8]) -> Result<u64, IdError> {
    if key.len() < ID_LEN {
        return Err(IdError::InvalidLength {
            expected: ID_LEN,
            got: key.len(),
        });
    }
    decode_id_key(&key[key.len() - ID_LEN..])
}
