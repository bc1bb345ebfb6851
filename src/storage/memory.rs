//! In-memory object store for hermetic tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use super::ObjectStore;
use crate::types::{Error, Result};

/// Bucket/key/value map. Cheap to clone; clones share the contents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    buckets: Arc<Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects in a bucket; zero when the bucket does not exist.
    pub fn object_count(&self, bucket: &str) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(bucket)
            .map_or(0, BTreeMap::len)
    }

    /// First object whose key contains `envelope_id`, parsed as JSON.
    pub fn find_envelope(&self, bucket: &str, envelope_id: &str) -> Option<serde_json::Value> {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let objects = buckets.get(bucket)?;
        objects
            .iter()
            .find(|(key, _)| key.contains(envelope_id))
            .and_then(|(_, body)| serde_json::from_slice(body).ok())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("MemoryStore")
            .field("buckets", &buckets.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        self.buckets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(bucket.to_string())
            .or_default();
        Ok(())
    }

    async fn put_json(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::storage(format!("bucket '{}' does not exist", bucket)))?;
        objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        Ok(buckets.get(bucket).and_then(|objects| objects.get(key).cloned()))
    }

    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>> {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        Ok(buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_requires_bucket() {
        let store = MemoryStore::new();
        assert!(store.put_json("missing", "k", b"{}".to_vec()).await.is_err());

        store.ensure_bucket("present").await.unwrap();
        store.put_json("present", "k", b"{}".to_vec()).await.unwrap();
        assert_eq!(store.get("present", "k").await.unwrap().unwrap(), b"{}");
    }

    #[tokio::test]
    async fn overwrite_keeps_a_single_object() {
        let store = MemoryStore::new();
        store.ensure_bucket("b").await.unwrap();
        store.put_json("b", "E1.json", b"{\"v\":1}".to_vec()).await.unwrap();
        store.put_json("b", "E1.json", b"{\"v\":1}".to_vec()).await.unwrap();
        assert_eq!(store.object_count("b"), 1);
    }
}
