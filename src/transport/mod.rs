//! Queue transport abstraction.
//!
//! Two production backends (RabbitMQ, SQS) plus an in-process backend for
//! hermetic tests, all with the same at-least-once contract: a delivery stays
//! owned by the consumer until acked, and a nack (or a dropped consumer)
//! makes it eligible for redelivery.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::Result;

pub mod memory;
pub mod rabbitmq;
pub mod sqs;

pub use memory::MemoryTransport;
pub use rabbitmq::RabbitMqTransport;
pub use sqs::SqsTransport;

/// Queue name under the `asya-<namespace>-<actor>` convention.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueName(String);

impl QueueName {
    pub fn for_actor(namespace: &str, actor: &str) -> Self {
        Self(format!("asya-{}-{}", namespace, actor))
    }

    /// Wrap an already-formatted queue name.
    pub fn raw(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Finalization handle for one delivery.
#[async_trait]
pub trait Acker: Send {
    /// Settle the delivery; the transport will not redeliver it.
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Return the delivery to the queue for another attempt.
    async fn nack(self: Box<Self>) -> Result<()>;
}

/// One consumed message plus its finalization handle.
pub struct Delivery {
    pub body: Vec<u8>,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, acker: Box<dyn Acker>) -> Self {
        Self { body, acker }
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nack(self) -> Result<()> {
        self.acker.nack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Queue transport seam shared by the sidecar and the gateway.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish one message body to a queue, creating it as needed.
    async fn publish(&self, queue: &QueueName, body: Vec<u8>) -> Result<()>;

    /// Subscribe to a queue. Deliveries arrive on the returned channel one at
    /// a time (prefetch 1); dropping the receiver stops the subscription.
    async fn consume(&self, queue: &QueueName) -> Result<mpsc::Receiver<Delivery>>;
}

/// Connect the backend selected by configuration.
pub async fn connect(
    config: &crate::types::TransportConfig,
) -> Result<std::sync::Arc<dyn Transport>> {
    use crate::types::TransportKind;
    match config.kind {
        TransportKind::Rabbitmq => Ok(std::sync::Arc::new(
            RabbitMqTransport::connect(&config.rabbitmq_url).await?,
        )),
        TransportKind::Sqs => Ok(std::sync::Arc::new(SqsTransport::connect(config).await?)),
    }
}
