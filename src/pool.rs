//! Admission control for chunk processing and per-version write locks

use crate::error::{Result, VoxelError};
use crate::types::{DataId, VersionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

/// Bounded pool of worker tokens gating chunk processing.
///
/// Each chunk acquires one token before it is dispatched and holds it until
/// the chunk finishes, bounding the memory and CPU in flight for
/// deserialization and copying. Acquisition blocks when the pool is empty.
#[derive(Clone)]
pub struct ChunkPool {
    tokens: Arc<Semaphore>,
}

impl ChunkPool {
    /// Create a pool with a fixed number of tokens.
    pub fn new(tokens: usize) -> Self {
        Self {
            tokens: Arc::new(Semaphore::new(tokens)),
        }
    }

    /// Create a pool sized to a small multiple of the CPU count.
    pub fn with_default_tokens() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::new(cpus * 2)
    }

    /// Acquire one token, waiting until one is free. The token is released
    /// when the returned permit is dropped, whether the chunk succeeds or
    /// panics.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.tokens)
            .acquire_owned()
            .await
            .map_err(|_| VoxelError::Invariant("Worker pool closed".to_string()))
    }

    /// Tokens currently available.
    pub fn available(&self) -> usize {
        self.tokens.available_permits()
    }
}

/// Lazily created writer locks keyed by (data, version).
///
/// A writer holds the lock for the whole of one mutating region request so
/// that concurrent writes on the same version cannot interleave their
/// read-modify-write cycles on shared blocks. Readers never take it.
#[derive(Default)]
pub struct VersionLocks {
    locks: RwLock<HashMap<(DataId, VersionId), Arc<Mutex<()>>>>,
}

impl VersionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the lock for (data, version), creating it on first use.
    pub fn get_or_create(&self, data: DataId, version: VersionId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().get(&(data, version)) {
            return Arc::clone(lock);
        }
        let mut locks = self.locks.write();
        Arc::clone(
            locks
                .entry((data, version))
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokens_are_returned_on_drop() {
        let pool = ChunkPool::new(2);
        assert_eq!(pool.available(), 2);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        drop(a);
        assert_eq!(pool.available(), 1);
        drop(b);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_version_locks_are_shared_per_key() {
        let locks = VersionLocks::new();
        let a = locks.get_or_create(1, 1);
        let b = locks.get_or_create(1, 1);
        let c = locks.get_or_create(1, 2);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_version_lock_serializes() {
        let locks = VersionLocks::new();
        let lock = locks.get_or_create(3, 9);

        let guard = lock.lock().await;
        assert!(lock.try_lock().is_err());
        drop(guard);
        assert!(lock.try_lock().is_ok());
    }
}
