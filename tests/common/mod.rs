//! Shared helpers: spin up real runtime + sidecar pairs over tempdir Unix
//! sockets, wired to the in-memory transport and object store.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use asya_core::endactor;
use asya_core::progress::{NullProgressSink, ProgressSink};
use asya_core::runtime::{self, HandlerRegistry};
use asya_core::sidecar::Sidecar;
use asya_core::storage::MemoryStore;
use asya_core::transport::{MemoryTransport, QueueName, Transport};
use asya_core::types::{HandlerMode, RuntimeConfig, SidecarConfig, StorageConfig};

pub const RESULTS_BUCKET: &str = "asya-results";
pub const ERRORS_BUCKET: &str = "asya-errors";

/// One running actor: a runtime serving a handler plus its sidecar.
pub struct ActorHarness {
    pub name: String,
    runtime_config: RuntimeConfig,
    store: MemoryStore,
    _socket_dir: tempfile::TempDir,
    runtime_cancel: tokio_util::sync::CancellationToken,
    sidecar_cancel: tokio_util::sync::CancellationToken,
}

impl Drop for ActorHarness {
    fn drop(&mut self) {
        self.runtime_cancel.cancel();
        self.sidecar_cancel.cancel();
    }
}

impl ActorHarness {
    /// Stop the runtime process, leaving the sidecar running. The socket and
    /// ready marker disappear, as they would on a pod container restart.
    pub async fn stop_runtime(&self) {
        self.runtime_cancel.cancel();
        let socket_path = self.runtime_config.socket_path();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while socket_path.exists() {
            assert!(tokio::time::Instant::now() < deadline, "runtime did not shut down");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Start a fresh runtime on the same socket path.
    pub async fn restart_runtime(&mut self) {
        self.runtime_cancel = start_runtime(self.runtime_config.clone(), &self.store).await;
    }
}

/// Build the registry, start a runtime task, and wait for the ready marker.
async fn start_runtime(
    config: RuntimeConfig,
    store: &MemoryStore,
) -> tokio_util::sync::CancellationToken {
    let mut registry = HandlerRegistry::new();
    runtime::samples::register_samples(&mut registry).unwrap();
    endactor::register_end_actors(
        &mut registry,
        Arc::new(store.clone()),
        &StorageConfig::default(),
    )
    .unwrap();

    let ready_path = config.ready_path();
    let mut server = runtime::build_server(config, &registry).unwrap();
    let cancel = server.cancellation_token();
    tokio::spawn(async move {
        let _ = server.serve().await;
    });
    wait_for_file(&ready_path).await;
    cancel
}

pub struct ActorSpec {
    pub name: &'static str,
    pub descriptor: &'static str,
    pub mode: HandlerMode,
    pub validation: bool,
    pub hop_timeout: Duration,
    pub sink: Arc<dyn ProgressSink>,
}

impl ActorSpec {
    pub fn payload(name: &'static str, descriptor: &'static str) -> Self {
        Self {
            name,
            descriptor,
            mode: HandlerMode::Payload,
            validation: true,
            hop_timeout: Duration::from_secs(10),
            sink: Arc::new(NullProgressSink),
        }
    }

    pub fn end_actor(name: &'static str, descriptor: &'static str) -> Self {
        Self {
            name,
            descriptor,
            mode: HandlerMode::Envelope,
            validation: false,
            hop_timeout: Duration::from_secs(10),
            sink: Arc::new(NullProgressSink),
        }
    }

    pub fn with_hop_timeout(mut self, hop_timeout: Duration) -> Self {
        self.hop_timeout = hop_timeout;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }
}

/// Start a runtime + sidecar pair for one actor and wait until the runtime
/// has signalled readiness.
pub async fn spawn_actor(
    transport: &MemoryTransport,
    store: &MemoryStore,
    spec: ActorSpec,
) -> ActorHarness {
    spawn_actor_on(Arc::new(transport.clone()), store, spec).await
}

/// Like [`spawn_actor`] but over any transport implementation.
pub async fn spawn_actor_on(
    transport: Arc<dyn Transport>,
    store: &MemoryStore,
    spec: ActorSpec,
) -> ActorHarness {
    let socket_dir = tempfile::tempdir().unwrap();

    let runtime_config = RuntimeConfig {
        handler: spec.descriptor.to_string(),
        mode: spec.mode,
        enable_validation: spec.validation,
        end_actor: spec.descriptor.starts_with("asya.end."),
        socket_dir: socket_dir.path().to_path_buf(),
        socket_chmod: String::new(),
        ..RuntimeConfig::default()
    };
    let runtime_cancel = start_runtime(runtime_config.clone(), store).await;

    let sidecar_config = SidecarConfig {
        actor: spec.name.to_string(),
        socket_dir: socket_dir.path().to_path_buf(),
        hop_timeout: spec.hop_timeout,
        reconnect_initial_backoff: Duration::from_millis(10),
        reconnect_max_backoff: Duration::from_millis(100),
        reconnect_budget: Duration::from_secs(5),
        ..SidecarConfig::default()
    };
    let sidecar = Sidecar::new(sidecar_config, transport, spec.sink);
    let sidecar_cancel = sidecar.cancellation_token();
    tokio::spawn(async move {
        let _ = sidecar.run().await;
    });

    ActorHarness {
        name: spec.name.to_string(),
        runtime_config,
        store: store.clone(),
        _socket_dir: socket_dir,
        runtime_cancel,
        sidecar_cancel,
    }
}

/// Start the built-in happy-end and error-end actors.
pub async fn spawn_end_actors(
    transport: &MemoryTransport,
    store: &MemoryStore,
) -> (ActorHarness, ActorHarness) {
    let happy = spawn_actor(
        transport,
        store,
        ActorSpec::end_actor("happy-end", endactor::HAPPY_END_DESCRIPTOR),
    )
    .await;
    let error = spawn_actor(
        transport,
        store,
        ActorSpec::end_actor("error-end", endactor::ERROR_END_DESCRIPTOR),
    )
    .await;
    (happy, error)
}

pub fn queue_for(actor: &str) -> QueueName {
    QueueName::for_actor("default", actor)
}

pub fn envelope_bytes(id: &str, actors: &[&str], payload: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": id,
        "route": { "actors": actors, "current": 0 },
        "payload": payload,
    }))
    .unwrap()
}

pub async fn publish_envelope(
    transport: &MemoryTransport,
    actor: &str,
    id: &str,
    actors: &[&str],
    payload: Value,
) {
    transport
        .publish(&queue_for(actor), envelope_bytes(id, actors, payload))
        .await
        .unwrap();
}

/// Poll the store until an object whose key contains `envelope_id` appears.
pub async fn wait_for_envelope(store: &MemoryStore, bucket: &str, envelope_id: &str) -> Value {
    wait_for_envelope_timeout(store, bucket, envelope_id, Duration::from_secs(10)).await
}

pub async fn wait_for_envelope_timeout(
    store: &MemoryStore,
    bucket: &str,
    envelope_id: &str,
    timeout: Duration,
) -> Value {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(envelope) = store.find_envelope(bucket, envelope_id) {
            return envelope;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "envelope {} did not appear in bucket {} within {:?}",
            envelope_id,
            bucket,
            timeout
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_for_file(path: &std::path::Path) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !path.exists() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "file {} did not appear",
            path.display()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Settle window for negative assertions (queue stays empty, etc).
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

/// Transport decorator that fails the first N publishes to one queue, then
/// delegates. Exercises the ack-only-after-publish contract.
pub struct FlakyTransport {
    inner: MemoryTransport,
    failing_queue: String,
    remaining_failures: std::sync::atomic::AtomicUsize,
}

impl FlakyTransport {
    pub fn new(inner: MemoryTransport, failing_queue: &QueueName, failures: usize) -> Self {
        Self {
            inner,
            failing_queue: failing_queue.as_str().to_string(),
            remaining_failures: std::sync::atomic::AtomicUsize::new(failures),
        }
    }
}

#[async_trait::async_trait]
impl asya_core::transport::Transport for FlakyTransport {
    async fn publish(
        &self,
        queue: &QueueName,
        body: Vec<u8>,
    ) -> asya_core::Result<()> {
        if queue.as_str() == self.failing_queue {
            let remaining = self
                .remaining_failures
                .fetch_update(
                    std::sync::atomic::Ordering::SeqCst,
                    std::sync::atomic::Ordering::SeqCst,
                    |n| n.checked_sub(1),
                )
                .is_ok();
            if remaining {
                return Err(asya_core::Error::Transport(format!(
                    "injected publish failure for '{}'",
                    queue
                )));
            }
        }
        self.inner.publish(queue, body).await
    }

    async fn consume(
        &self,
        queue: &QueueName,
    ) -> asya_core::Result<tokio::sync::mpsc::Receiver<asya_core::transport::Delivery>> {
        self.inner.consume(queue).await
    }
}
