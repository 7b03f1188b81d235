//! Ordered key-value store interface consumed by the engine

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Trait for the ordered key-value store backing the engine.
///
/// Keys are byte strings; implementations must return ranged results in
/// ascending lexicographic key order, which the engine relies on matching
/// the (z, y, x) block ordering.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value at `key`, or `None` if the key has never been written.
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Write `value` under `key`, replacing any existing value.
    async fn put(&self, key: &[u8], value: Bytes) -> Result<()>;

    /// Materialised fetch of every pair with `start <= key <= end`, in
    /// ascending key order.
    async fn get_range(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Bytes)>>;

    /// Streams every pair in `[start, end]` to `handler` in ascending key
    /// order.
    async fn process_range(
        &self,
        start: &[u8],
        end: &[u8],
        handler: &mut (dyn for<'a, 'b> FnMut(&'a [u8], &'b Bytes) + Send),
    ) -> Result<()> {
        for (key, value) in self.get_range(start, end).await? {
            handler(&key, &value);
        }
        Ok(())
    }
}

/// In-memory reference store over a sorted map. Used as the local backend
/// and by tests; production deployments implement `KeyValueStore` over their
/// own ordered store.
#[derive(Default)]
pub struct MemoryStore {
    map: RwLock<BTreeMap<Vec<u8>, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently present.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.map.read().get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
        self.map.write().insert(key.to_vec(), value);
        Ok(())
    }

    async fn get_range(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Bytes)>> {
        let map = self.map.read();
        let pairs = map
            .range::<[u8], _>((Bound::Included(start), Bound::Included(end)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryStore::new();
        assert!(store.get(b"a").await.unwrap().is_none());

        store.put(b"a", Bytes::from_static(b"1")).await.unwrap();
        assert_eq!(store.get(b"a").await.unwrap().unwrap(), &b"1"[..]);

        store.put(b"a", Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(store.get(b"a").await.unwrap().unwrap(), &b"2"[..]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_range_inclusive_and_ordered() {
        let store = MemoryStore::new();
        for key in [b"b", b"d", b"a", b"c", b"e"] {
            store.put(key, Bytes::copy_from_slice(key)).await.unwrap();
        }

        let pairs = store.get_range(b"b", b"d").await.unwrap();
        let keys: Vec<&[u8]> = pairs.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"b" as &[u8], b"c", b"d"]);
    }

    #[tokio::test]
    async fn test_process_range_streams_in_order() {
        let store = MemoryStore::new();
        for key in [b"1", b"3", b"2"] {
            store.put(key, Bytes::copy_from_slice(key)).await.unwrap();
        }

        let mut seen = Vec::new();
        store
            .process_range(b"1", b"3", &mut |key, _| seen.push(key.to_vec()))
            .await
            .unwrap();
        assert_eq!(seen, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);
    }
}
