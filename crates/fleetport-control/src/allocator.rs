//! Port allocation.
//!
//! Ports come from the inclusive range `[port_min, port_max]`. A port is in use
//! while any allocation holding it is `Requested`, `Starting`, or `Active`.
//! Selection tries a handful of uniformly random ports first, which almost
//! always succeeds on a sparse pool, then falls back to an ascending scan so a
//! nearly full pool still terminates with the lowest free port.

use std::collections::BTreeSet;

use chrono::Utc;
use fleetport_core::{AgentId, AllocationId, UserId};
use fleetport_store::{Allocation, AllocationStatus, Sequence, Store};
use rand::Rng;

use crate::error::{ControlError, Result};
use crate::lock::{LockProvider, PORT_LOCK};
use crate::types::{ControlConfig, LockMode};

/// Pick a port in `[min, max]` that is not in `used`.
///
/// Returns `None` if every port in the range is used.
pub fn pick_port<R: Rng>(
    used: &BTreeSet<u16>,
    min: u16,
    max: u16,
    random_attempts: u32,
    rng: &mut R,
) -> Option<u16> {
    if min > max {
        return None;
    }

    for _ in 0..random_attempts {
        let candidate = rng.gen_range(min..=max);
        if !used.contains(&candidate) {
            return Some(candidate);
        }
    }

    (min..=max).find(|port| !used.contains(port))
}

/// Reserve a port for `agent_id` and persist a `Requested` allocation.
///
/// The used-port read and the allocation write happen while holding the port
/// lock. In strict mode a lock failure aborts; in best-effort mode it is logged
/// and the allocation proceeds unprotected.
///
/// # Errors
///
/// Returns `ControlError::LockUnavailable` (strict mode only),
/// `ControlError::ResourceExhausted` if the pool is full, or a storage error.
pub async fn allocate<S: Store>(
    store: &S,
    locks: &dyn LockProvider,
    config: &ControlConfig,
    agent_id: AgentId,
    user_id: UserId,
    service: &str,
) -> Result<Allocation> {
    let lease = match locks.acquire(PORT_LOCK, config.port_lock_timeout()).await {
        Ok(lease) => Some(lease),
        Err(err) if config.lock_mode == LockMode::BestEffort => {
            tracing::warn!(
                error = %err,
                "Port lock unavailable, allocating without mutual exclusion"
            );
            None
        }
        Err(err) => return Err(err),
    };

    let used = store.held_ports()?;
    let port = pick_port(
        &used,
        config.port_min,
        config.port_max,
        config.port_random_attempts,
        &mut rand::thread_rng(),
    )
    .ok_or(ControlError::ResourceExhausted {
        min: config.port_min,
        max: config.port_max,
    })?;

    let now = Utc::now();
    let allocation = Allocation {
        allocation_id: AllocationId::new(store.next_id(Sequence::Allocation)?),
        agent_id,
        user_id,
        service: service.to_string(),
        remote_port: port,
        status: AllocationStatus::Requested,
        created_at: now,
        updated_at: now,
        released_at: None,
        error_message: None,
    };
    store.put_allocation(&allocation)?;

    drop(lease);

    tracing::debug!(
        allocation_id = %allocation.allocation_id,
        port,
        in_use = used.len(),
        "Reserved port"
    );

    Ok(allocation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{InProcessLockProvider, UnavailableLockProvider};
    use fleetport_store::RocksStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn small_pool(min: u16, max: u16) -> ControlConfig {
        ControlConfig {
            port_min: min,
            port_max: max,
            port_lock_timeout_ms: 100,
            ..ControlConfig::default()
        }
    }

    async fn reserve(
        store: &RocksStore,
        locks: &dyn LockProvider,
        config: &ControlConfig,
    ) -> Result<Allocation> {
        allocate(store, locks, config, AgentId::new(1), UserId::new(1), "code_server").await
    }

    #[test]
    fn picks_within_range_and_avoids_used() {
        let mut rng = StdRng::seed_from_u64(7);
        let used: BTreeSet<u16> = (100..=108).collect();

        for _ in 0..200 {
            let port = pick_port(&used, 100, 110, 10, &mut rng).unwrap();
            assert!((109..=110).contains(&port));
        }
    }

    #[test]
    fn linear_scan_takes_lowest_free_port() {
        let mut rng = StdRng::seed_from_u64(1);
        let used: BTreeSet<u16> = (100..=110).filter(|p| ![104, 109].contains(p)).collect();

        // No random attempts: straight to the scan
        assert_eq!(pick_port(&used, 100, 110, 0, &mut rng), Some(104));
    }

    #[test]
    fn full_or_empty_range_yields_none() {
        let mut rng = StdRng::seed_from_u64(1);
        let used: BTreeSet<u16> = (100..=102).collect();
        assert_eq!(pick_port(&used, 100, 102, 10, &mut rng), None);
        assert_eq!(pick_port(&BTreeSet::new(), 5, 4, 10, &mut rng), None);
    }

    #[test]
    fn single_port_range() {
        let mut rng = StdRng::seed_from_u64(1);
        let port = pick_port(&BTreeSet::new(), 7000, 7000, 10, &mut rng);
        assert_eq!(port, Some(7000));
    }

    #[tokio::test]
    async fn exhaustion_creates_no_row() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let locks = InProcessLockProvider::new();
        let config = small_pool(50000, 50002);

        let mut ports = BTreeSet::new();
        for _ in 0..3 {
            let allocation = reserve(&store, &locks, &config).await.unwrap();
            assert!((50000..=50002).contains(&allocation.remote_port));
            assert!(ports.insert(allocation.remote_port));
        }

        let result = reserve(&store, &locks, &config).await;
        assert!(matches!(
            result,
            Err(ControlError::ResourceExhausted {
                min: 50000,
                max: 50002
            })
        ));
        assert_eq!(store.list_allocations().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn terminal_allocations_free_their_port() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let locks = InProcessLockProvider::new();
        let config = small_pool(50000, 50000);

        let mut first = reserve(&store, &locks, &config).await.unwrap();
        first.status = AllocationStatus::Failed;
        store.put_allocation(&first).unwrap();

        let second = reserve(&store, &locks, &config).await.unwrap();
        assert_eq!(second.remote_port, 50000);
    }

    #[tokio::test]
    async fn strict_mode_fails_without_lock() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let config = small_pool(50000, 50010);

        let result = reserve(&store, &UnavailableLockProvider, &config).await;

        assert!(matches!(result, Err(ControlError::LockUnavailable(_))));
        assert!(store.list_allocations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn best_effort_mode_proceeds_without_lock() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let config = ControlConfig {
            lock_mode: LockMode::BestEffort,
            ..small_pool(50000, 50010)
        };

        let allocation = reserve(&store, &UnavailableLockProvider, &config)
            .await
            .unwrap();
        assert_eq!(allocation.status, AllocationStatus::Requested);
    }
}
