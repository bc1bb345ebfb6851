//! In-process transport for hermetic tests.
//!
//! Same ownership semantics as the broker backends: a popped message is
//! invisible until acked; nack returns it to the head of its queue.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

use super::{Acker, Delivery, QueueName, Transport};
use crate::types::Result;

#[derive(Default)]
struct MemoryQueue {
    messages: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
}

impl MemoryQueue {
    fn push_back(&self, body: Vec<u8>) {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).push_back(body);
        self.notify.notify_one();
    }

    fn push_front(&self, body: Vec<u8>) {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).push_front(body);
        self.notify.notify_one();
    }

    fn pop_front(&self) -> Option<Vec<u8>> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }

    fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// In-memory queue fabric. Cheap to clone; clones share the queues.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    queues: Arc<Mutex<HashMap<String, Arc<MemoryQueue>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, name: &str) -> Arc<MemoryQueue> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.entry(name.to_string()).or_default().clone()
    }

    /// Number of visible (unconsumed) messages; test introspection.
    pub fn depth(&self, queue: &QueueName) -> usize {
        self.queue(queue.as_str()).len()
    }

    /// Pop one visible message without ack bookkeeping; test introspection.
    pub fn try_pop(&self, queue: &QueueName) -> Option<Vec<u8>> {
        self.queue(queue.as_str()).pop_front()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("MemoryTransport")
            .field("queues", &queues.keys().collect::<Vec<_>>())
            .finish()
    }
}

struct MemoryAcker {
    queue: Arc<MemoryQueue>,
    body: Vec<u8>,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<()> {
        self.queue.push_front(self.body);
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, queue: &QueueName, body: Vec<u8>) -> Result<()> {
        self.queue(queue.as_str()).push_back(body);
        Ok(())
    }

    async fn consume(&self, queue: &QueueName) -> Result<mpsc::Receiver<Delivery>> {
        let queue = self.queue(queue.as_str());
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            loop {
                let body = match queue.pop_front() {
                    Some(body) => body,
                    None => {
                        queue.notify.notified().await;
                        continue;
                    }
                };
                let delivery = Delivery::new(
                    body.clone(),
                    Box::new(MemoryAcker {
                        queue: queue.clone(),
                        body,
                    }),
                );
                if tx.send(delivery).await.is_err() {
                    // Subscriber gone; the in-flight message stays consumed,
                    // matching a broker delivery lost with its channel.
                    break;
                }
            }
        });

        Ok(rx)
    }
}
