//! SQS transport backed by the AWS SDK.
//!
//! Queues are addressed by URL, resolved once and cached; missing queues are
//! created on first use. Redelivery relies on the visibility timeout: ack
//! deletes the message, nack resets its visibility to zero.

use async_trait::async_trait;
use aws_sdk_sqs::Client;
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};

use super::{Acker, Delivery, QueueName, Transport};
use crate::types::{Error, Result, TransportConfig};

/// SQS caps message bodies at 256 KiB; larger payloads fail at this boundary.
pub const MAX_BODY_BYTES: usize = 256 * 1024;

const WAIT_TIME_SECONDS: i32 = 10;

/// SQS transport with a per-process queue URL cache.
pub struct SqsTransport {
    client: Client,
    queue_urls: Mutex<HashMap<String, String>>,
}

impl std::fmt::Debug for SqsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsTransport").finish()
    }
}

impl SqsTransport {
    pub async fn connect(config: &TransportConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(endpoint) = &config.sqs_endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let shared = loader.load().await;
        Ok(Self {
            client: Client::new(&shared),
            queue_urls: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve (and cache) the queue URL, creating the queue when missing.
    async fn queue_url(&self, queue: &QueueName) -> Result<String> {
        {
            let urls = self.queue_urls.lock().await;
            if let Some(url) = urls.get(queue.as_str()) {
                return Ok(url.clone());
            }
        }

        let resolved = match self
            .client
            .get_queue_url()
            .queue_name(queue.as_str())
            .send()
            .await
        {
            Ok(out) => out.queue_url().map(str::to_string),
            Err(_) => None,
        };

        let url = match resolved {
            Some(url) => url,
            None => {
                tracing::info!("Queue '{}' does not exist, creating", queue);
                let created = self
                    .client
                    .create_queue()
                    .queue_name(queue.as_str())
                    .send()
                    .await
                    .map_err(|e| Error::transport(format!("create queue '{}' failed: {}", queue, e)))?;
                created
                    .queue_url()
                    .map(str::to_string)
                    .ok_or_else(|| Error::transport(format!("create queue '{}' returned no URL", queue)))?
            }
        };

        self.queue_urls
            .lock()
            .await
            .insert(queue.as_str().to_string(), url.clone());
        Ok(url)
    }
}

struct SqsAcker {
    client: Client,
    queue_url: String,
    receipt_handle: String,
}

#[async_trait]
impl Acker for SqsAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&self.receipt_handle)
            .send()
            .await
            .map_err(|e| Error::transport(format!("delete message failed: {}", e)))?;
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<()> {
        // Make the message immediately visible again.
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(&self.receipt_handle)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| Error::transport(format!("visibility reset failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl Transport for SqsTransport {
    async fn publish(&self, queue: &QueueName, body: Vec<u8>) -> Result<()> {
        if body.len() > MAX_BODY_BYTES {
            return Err(Error::transport(format!(
                "message of {} bytes exceeds the SQS limit of {} bytes",
                body.len(),
                MAX_BODY_BYTES
            )));
        }
        let body = String::from_utf8(body)
            .map_err(|e| Error::transport(format!("message body is not UTF-8: {}", e)))?;
        let url = self.queue_url(queue).await?;
        self.client
            .send_message()
            .queue_url(&url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| Error::transport(format!("publish to '{}' failed: {}", queue, e)))?;
        Ok(())
    }

    async fn consume(&self, queue: &QueueName) -> Result<mpsc::Receiver<Delivery>> {
        let url = self.queue_url(queue).await?;
        let client = self.client.clone();
        let queue_name = queue.clone();
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            loop {
                let received = client
                    .receive_message()
                    .queue_url(&url)
                    .max_number_of_messages(1)
                    .wait_time_seconds(WAIT_TIME_SECONDS)
                    .send()
                    .await;

                let messages = match received {
                    Ok(out) => out.messages.unwrap_or_default(),
                    Err(e) => {
                        tracing::warn!("Receive on '{}' failed: {}", queue_name, e);
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        continue;
                    }
                };

                for message in messages {
                    let Some(receipt_handle) = message.receipt_handle else {
                        continue;
                    };
                    let body = message.body.unwrap_or_default().into_bytes();
                    let delivery = Delivery::new(
                        body,
                        Box::new(SqsAcker {
                            client: client.clone(),
                            queue_url: url.clone(),
                            receipt_handle,
                        }),
                    );
                    if tx.send(delivery).await.is_err() {
                        return; // subscriber gone; visibility timeout redelivers
                    }
                }
            }
        });

        Ok(rx)
    }
}
