//! Built-in end actors.
//!
//! Happy-end and error-end are ordinary actors whose handlers run in
//! envelope mode with validation disabled: they accept whatever envelope
//! reaches end-of-route (including over-incremented cursors and attached
//! error records), persist it verbatim under a key derived from its id, and
//! return no outputs so routing stops.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::runtime::handler::{Handler, HandlerError, HandlerOutput, HandlerRegistry};
use crate::storage::{envelope_key, ObjectStore};
use crate::types::{EnvelopeId, Result, StorageConfig};

/// Descriptor for the happy-end handler.
pub const HAPPY_END_DESCRIPTOR: &str = "asya.end.happy_end";
/// Descriptor for the error-end handler.
pub const ERROR_END_DESCRIPTOR: &str = "asya.end.error_end";

/// Persists terminal envelopes into one bucket.
pub struct EndActorHandler {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    bucket_ready: bool,
}

impl std::fmt::Debug for EndActorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndActorHandler")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl EndActorHandler {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            bucket_ready: false,
        }
    }
}

#[async_trait]
impl Handler for EndActorHandler {
    async fn process(&mut self, input: Value) -> std::result::Result<HandlerOutput, HandlerError> {
        // Bucket creation is best-effort at first write.
        if !self.bucket_ready {
            match self.store.ensure_bucket(&self.bucket).await {
                Ok(()) => self.bucket_ready = true,
                Err(e) => tracing::warn!("Bucket '{}' not ensured: {}", self.bucket, e),
            }
        }

        // Envelopes that never got an id (pre-parse failures) still persist,
        // under a generated key.
        let generated;
        let envelope_id = match input.get("id").and_then(Value::as_str) {
            Some(id) => id,
            None => {
                generated = EnvelopeId::new();
                generated.as_str()
            }
        };
        let key = envelope_key(envelope_id);

        let body = serde_json::to_vec(&input)
            .map_err(|e| HandlerError::processing(format!("envelope serialization failed: {}", e)))?;
        self.store
            .put_json(&self.bucket, &key, body)
            .await
            .map_err(|e| {
                HandlerError::processing(format!(
                    "persist of envelope {} to bucket '{}' failed: {}",
                    envelope_id, self.bucket, e
                ))
            })?;

        tracing::info!("Persisted envelope {} to {}/{}", envelope_id, self.bucket, key);
        Ok(HandlerOutput::Empty)
    }
}

/// Register both end-actor handlers against their storage buckets.
pub fn register_end_actors(
    registry: &mut HandlerRegistry,
    store: Arc<dyn ObjectStore>,
    config: &StorageConfig,
) -> Result<()> {
    let results_bucket = config.results_bucket.clone();
    let results_store = store.clone();
    registry.register(HAPPY_END_DESCRIPTOR, move || {
        Box::new(EndActorHandler::new(results_store.clone(), results_bucket.clone()))
    })?;

    let errors_bucket = config.errors_bucket.clone();
    registry.register(ERROR_END_DESCRIPTOR, move || {
        Box::new(EndActorHandler::new(store.clone(), errors_bucket.clone()))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn terminal_envelope() -> Value {
        json!({
            "id": "E1",
            "route": {"actors": ["echo"], "current": 1},
            "payload": {"echoed": "hi"},
        })
    }

    #[tokio::test]
    async fn persists_envelope_under_id_key() {
        let store = MemoryStore::new();
        let mut handler = EndActorHandler::new(Arc::new(store.clone()), "asya-results");

        let out = handler.process(terminal_envelope()).await.unwrap();
        assert_eq!(out, HandlerOutput::Empty);

        let persisted = store.find_envelope("asya-results", "E1").unwrap();
        assert_eq!(persisted, terminal_envelope());
    }

    #[tokio::test]
    async fn repeated_delivery_is_idempotent() {
        let store = MemoryStore::new();
        let mut handler = EndActorHandler::new(Arc::new(store.clone()), "asya-results");

        handler.process(terminal_envelope()).await.unwrap();
        handler.process(terminal_envelope()).await.unwrap();

        assert_eq!(store.object_count("asya-results"), 1);
        assert_eq!(
            store.find_envelope("asya-results", "E1").unwrap(),
            terminal_envelope()
        );
    }

    #[tokio::test]
    async fn error_record_is_preserved_verbatim() {
        let store = MemoryStore::new();
        let mut handler = EndActorHandler::new(Arc::new(store.clone()), "asya-errors");

        let envelope = json!({
            "id": "E2",
            "route": {"actors": ["error"], "current": 0},
            "payload": {"should_fail": true},
            "error": {"kind": "processing_error", "message": "boom", "type": "HandlerError"},
        });
        handler.process(envelope.clone()).await.unwrap();

        let persisted = store.find_envelope("asya-errors", "E2").unwrap();
        assert_eq!(persisted["error"]["kind"], "processing_error");
        assert_eq!(persisted["payload"]["should_fail"], json!(true));
    }

    #[tokio::test]
    async fn envelope_without_id_still_persists() {
        let store = MemoryStore::new();
        let mut handler = EndActorHandler::new(Arc::new(store.clone()), "asya-errors");

        let envelope = json!({
            "route": {"actors": ["error-end"], "current": 0},
            "payload": "unparseable input",
            "error": {"kind": "msg_parsing_error", "message": "invalid JSON", "type": "msg_parsing_error"},
        });
        handler.process(envelope).await.unwrap();
        assert_eq!(store.object_count("asya-errors"), 1);
    }
}
