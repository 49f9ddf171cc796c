//! In-memory message channel for local runs and tests.
//!
//! Each queue is a tokio mpsc channel drained by one consumer task, so
//! deliveries on a queue reach the handler in publish order. Messages
//! published before anyone subscribes wait in the queue, like a broker would
//! hold them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{BusError, Delivery, MessageChannel, MessageHandler, Result};

/// Most recent publishes kept for inspection; older ones are dropped.
pub const PUBLISH_HISTORY_LIMIT: usize = 1024;

struct Queue {
    sender: mpsc::UnboundedSender<Arc<Delivery>>,
    /// Taken by the first subscriber.
    receiver: Option<mpsc::UnboundedReceiver<Arc<Delivery>>>,
}

impl Queue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
        }
    }
}

/// In-process message channel.
#[derive(Default)]
pub struct MemoryChannel {
    queues: Mutex<HashMap<String, Queue>>,
    published: RwLock<VecDeque<Delivery>>,
    failing: RwLock<HashSet<String>>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish to `queue` fail until `restore_queue` is called.
    pub async fn fail_queue(&self, queue: &str) {
        self.failing.write().await.insert(queue.to_string());
    }

    pub async fn restore_queue(&self, queue: &str) {
        self.failing.write().await.remove(queue);
    }

    /// Payloads recently published to `queue`, in publish order.
    ///
    /// Only the last `PUBLISH_HISTORY_LIMIT` publishes across all queues are kept.
    pub async fn published_to(&self, queue: &str) -> Vec<Vec<u8>> {
        self.published
            .read()
            .await
            .iter()
            .filter(|d| d.queue == queue)
            .map(|d| d.payload.clone())
            .collect()
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    async fn consume(
        queue: String,
        mut receiver: mpsc::UnboundedReceiver<Arc<Delivery>>,
        handler: Arc<dyn MessageHandler>,
    ) {
        while let Some(delivery) = receiver.recv().await {
            if let Err(e) = handler.handle(delivery).await {
                error!(queue = %queue, error = %e, "Handler failed");
            }
        }
        info!(queue = %queue, "Queue closed, stopping consumer");
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        if self.failing.read().await.contains(queue) {
            return Err(BusError::Publish {
                queue: queue.to_string(),
                message: "queue unavailable".to_string(),
            });
        }

        let delivery = Delivery::new(queue, payload.to_vec());
        {
            let mut queues = self.queues.lock().await;
            let entry = queues.entry(queue.to_string()).or_insert_with(Queue::new);
            entry
                .sender
                .send(Arc::new(delivery.clone()))
                .map_err(|_| BusError::Closed)?;
        }
        {
            let mut published = self.published.write().await;
            if published.len() == PUBLISH_HISTORY_LIMIT {
                published.pop_front();
            }
            published.push_back(delivery);
        }

        debug!(queue = %queue, bytes = payload.len(), "Published message to memory queue");
        Ok(())
    }

    async fn subscribe(&self, queue: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let receiver = {
            let mut queues = self.queues.lock().await;
            let entry = queues.entry(queue.to_string()).or_insert_with(Queue::new);
            entry.receiver.take().ok_or_else(|| {
                BusError::Subscribe(format!("Queue '{}' already has a consumer", queue))
            })?
        };

        let task = tokio::spawn(Self::consume(queue.to_string(), receiver, handler));
        self.consumers.lock().await.push(task);

        info!(queue = %queue, "Subscribed to memory queue");
        Ok(())
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        for task in self.consumers.lock().await.drain(..) {
            task.abort();
        }
        self.queues.lock().await.clear();
        info!("Memory channel shut down");
    }
}

#[cfg(test)]
mod tests;
