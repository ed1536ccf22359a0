//! Mutual exclusion for the port-allocation critical section.
//!
//! The allocator never assumes it is the only control plane instance. It asks
//! an injected [`LockProvider`] for a named, time-bounded lease and holds it
//! while reading the used-port set and writing the new allocation.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{ControlError, Result};

/// Name of the lock guarding the port pool.
pub const PORT_LOCK: &str = "port_allocation";

/// A held lock. The lock is released when the lease is dropped.
pub struct LockLease {
    name: String,
    _guard: Box<dyn Any + Send>,
}

impl LockLease {
    /// Wrap a provider-specific guard.
    #[must_use]
    pub fn new(name: impl Into<String>, guard: Box<dyn Any + Send>) -> Self {
        Self {
            name: name.into(),
            _guard: guard,
        }
    }

    /// The lock name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for LockLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockLease").field("name", &self.name).finish()
    }
}

/// Source of named, time-bounded exclusive locks.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Acquire the named lock, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::LockUnavailable` if the lock is not acquired in time
    /// or the coordination service cannot be reached.
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<LockLease>;
}

/// Lock provider for a single control plane process.
#[derive(Default)]
pub struct InProcessLockProvider {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InProcessLockProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockProvider for InProcessLockProvider {
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<LockLease> {
        let mutex = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(name.to_string()).or_default())
        };

        let guard = tokio::time::timeout(timeout, mutex.lock_owned())
            .await
            .map_err(|_| {
                ControlError::LockUnavailable(format!("timed out waiting for {name}"))
            })?;

        Ok(LockLease::new(name, Box::new(guard)))
    }
}

/// A lock provider whose coordination service is always unreachable.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct UnavailableLockProvider;

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl LockProvider for UnavailableLockProvider {
    async fn acquire(&self, name: &str, _timeout: Duration) -> Result<LockLease> {
        Err(ControlError::LockUnavailable(format!(
            "coordination service unreachable for {name}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lease_excludes_second_holder() {
        let provider = InProcessLockProvider::new();

        let lease = provider
            .acquire(PORT_LOCK, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(lease.name(), PORT_LOCK);

        let second = provider.acquire(PORT_LOCK, Duration::from_millis(50)).await;
        assert!(matches!(second, Err(ControlError::LockUnavailable(_))));

        drop(lease);
        assert!(provider
            .acquire(PORT_LOCK, Duration::from_millis(50))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn different_names_do_not_contend() {
        let provider = InProcessLockProvider::new();
        let _a = provider.acquire("a", Duration::from_millis(50)).await.unwrap();
        assert!(provider.acquire("b", Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn unavailable_provider_always_fails() {
        let result = UnavailableLockProvider
            .acquire(PORT_LOCK, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(ControlError::LockUnavailable(_))));
    }
}
