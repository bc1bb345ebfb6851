//! RabbitMQ transport backed by `lapin`.
//!
//! Messages flow through the durable topic exchange `asya` with the queue
//! name as routing key. Publishes are persistent with an
//! `application/json` content type; consumes use manual ack and prefetch 1 so
//! the sidecar owns at most one delivery at a time.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use std::collections::HashSet;
use tokio::sync::{mpsc, Mutex};

use super::{Acker, Delivery, QueueName, Transport};
use crate::types::{Error, Result};

const EXCHANGE: &str = "asya";

/// RabbitMQ transport. One connection; the publish channel is serialized
/// behind a mutex, consumers get a dedicated channel each.
pub struct RabbitMqTransport {
    connection: Connection,
    publish_channel: Mutex<Channel>,
    declared: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for RabbitMqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitMqTransport")
            .field("status", &self.connection.status().state())
            .finish()
    }
}

impl RabbitMqTransport {
    pub async fn connect(url: &str) -> Result<Self> {
        let options = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);
        let connection = Connection::connect(url, options)
            .await
            .map_err(|e| Error::transport(format!("rabbitmq connect failed: {}", e)))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| Error::transport(format!("rabbitmq channel failed: {}", e)))?;
        channel
            .exchange_declare(
                EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::transport(format!("exchange declare failed: {}", e)))?;

        tracing::info!("Connected to RabbitMQ, exchange '{}'", EXCHANGE);
        Ok(Self {
            connection,
            publish_channel: Mutex::new(channel),
            declared: Mutex::new(HashSet::new()),
        })
    }

    /// Declare the queue and bind it to the exchange, once per queue name.
    async fn ensure_queue(&self, channel: &Channel, queue: &QueueName) -> Result<()> {
        {
            let declared = self.declared.lock().await;
            if declared.contains(queue.as_str()) {
                return Ok(());
            }
        }
        channel
            .queue_declare(
                queue.as_str(),
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::transport(format!("queue declare '{}' failed: {}", queue, e)))?;
        channel
            .queue_bind(
                queue.as_str(),
                EXCHANGE,
                queue.as_str(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::transport(format!("queue bind '{}' failed: {}", queue, e)))?;
        self.declared.lock().await.insert(queue.as_str().to_string());
        Ok(())
    }
}

struct LapinAcker {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl Acker for LapinAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| Error::transport(format!("ack failed: {}", e)))
    }

    async fn nack(self: Box<Self>) -> Result<()> {
        self.acker
            .nack(BasicNackOptions {
                requeue: true,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::transport(format!("nack failed: {}", e)))
    }
}

#[async_trait]
impl Transport for RabbitMqTransport {
    async fn publish(&self, queue: &QueueName, body: Vec<u8>) -> Result<()> {
        let channel = self.publish_channel.lock().await;
        self.ensure_queue(&channel, queue).await?;
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2); // persistent
        channel
            .basic_publish(
                EXCHANGE,
                queue.as_str(),
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await
            .map_err(|e| Error::transport(format!("publish to '{}' failed: {}", queue, e)))?
            .await
            .map_err(|e| Error::transport(format!("publish confirm for '{}' failed: {}", queue, e)))?;
        Ok(())
    }

    async fn consume(&self, queue: &QueueName) -> Result<mpsc::Receiver<Delivery>> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| Error::transport(format!("consumer channel failed: {}", e)))?;
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| Error::transport(format!("qos failed: {}", e)))?;
        self.ensure_queue(&channel, queue).await?;

        let mut consumer = channel
            .basic_consume(
                queue.as_str(),
                &format!("asya-sidecar-{}", uuid::Uuid::new_v4().simple()),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::transport(format!("consume on '{}' failed: {}", queue, e)))?;

        let (tx, rx) = mpsc::channel(1);
        let queue_name = queue.clone();
        tokio::spawn(async move {
            while let Some(attempt) = consumer.next().await {
                let delivery = match attempt {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Consumer error on '{}': {}", queue_name, e);
                        continue;
                    }
                };
                let wrapped = Delivery::new(
                    delivery.data,
                    Box::new(LapinAcker {
                        acker: delivery.acker,
                    }),
                );
                if tx.send(wrapped).await.is_err() {
                    break; // subscriber gone; unacked delivery is redelivered
                }
            }
            // Keep the channel alive for the lifetime of the consumer stream.
            drop(channel);
        });

        Ok(rx)
    }
}
