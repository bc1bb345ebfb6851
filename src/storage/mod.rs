//! Object storage seam for the end actors.
//!
//! Keys are derived deterministically from the envelope id, so repeated
//! delivery of the same envelope overwrites the same object and persistence
//! stays idempotent under at-least-once transport semantics.

use async_trait::async_trait;

use crate::types::Result;

pub mod memory;
pub mod s3;

pub use memory::MemoryStore;
pub use s3::S3Store;

/// Deterministic object key for an envelope. The operator treats any key
/// containing the id as belonging to that envelope.
pub fn envelope_key(envelope_id: &str) -> String {
    format!("{}.json", envelope_id)
}

/// S3-compatible object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the bucket when missing. Safe to call repeatedly.
    async fn ensure_bucket(&self, bucket: &str) -> Result<()>;

    /// Write a JSON object, overwriting any previous object under the key.
    async fn put_json(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()>;

    /// Read an object, `None` when the key does not exist.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// List all keys in a bucket.
    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::envelope_key;

    #[test]
    fn key_contains_envelope_id() {
        let key = envelope_key("E1");
        assert!(key.contains("E1"));
        assert_eq!(envelope_key("E1"), key);
    }
}
