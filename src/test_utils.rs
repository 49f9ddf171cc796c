//! Test utilities shared by unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::bus::{self, BusError, Delivery, MemoryChannel, MessageChannel, MessageHandler};
use crate::storage::UserRecord;

/// Handler that counts deliveries and forwards them to a channel.
pub struct RecordingHandler {
    count: Arc<AtomicUsize>,
    tx: mpsc::UnboundedSender<Arc<Delivery>>,
}

impl RecordingHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Arc<Delivery>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                count: Arc::new(AtomicUsize::new(0)),
                tx,
            },
            rx,
        )
    }

    pub fn count(&self) -> Arc<AtomicUsize> {
        self.count.clone()
    }
}

impl MessageHandler for RecordingHandler {
    fn handle(&self, delivery: Arc<Delivery>) -> BoxFuture<'static, Result<(), BusError>> {
        let count = self.count.clone();
        let tx = self.tx.clone();
        Box::pin(async move {
            count.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(delivery);
            Ok(())
        })
    }
}

/// Handler that always fails with the given error kind.
pub struct FailingHandler {
    pub decode: bool,
}

impl MessageHandler for FailingHandler {
    fn handle(&self, _delivery: Arc<Delivery>) -> BoxFuture<'static, Result<(), BusError>> {
        let decode = self.decode;
        Box::pin(async move {
            if decode {
                Err(BusError::Decode("bad payload".to_string()))
            } else {
                Err(BusError::Handler("downstream failure".to_string()))
            }
        })
    }
}

/// Memory channel whose publishes to some queues stall before going through.
pub struct SlowChannel {
    pub inner: MemoryChannel,
    slow: HashSet<String>,
    delay: Duration,
}

impl SlowChannel {
    pub fn new(slow: &[&str], delay: Duration) -> Self {
        Self {
            inner: MemoryChannel::new(),
            slow: slow.iter().map(|q| q.to_string()).collect(),
            delay,
        }
    }
}

#[async_trait]
impl MessageChannel for SlowChannel {
    async fn publish(&self, queue: &str, payload: &[u8]) -> bus::Result<()> {
        if self.slow.contains(queue) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.publish(queue, payload).await
    }

    async fn subscribe(&self, queue: &str, handler: Arc<dyn MessageHandler>) -> bus::Result<()> {
        self.inner.subscribe(queue, handler).await
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

pub fn sample_user(email: &str) -> UserRecord {
    UserRecord {
        id: None,
        email: email.to_string(),
        phone: "+31 6 1234 5678".to_string(),
        date_of_birth: "1990-04-12".to_string(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        credit_card_number: 41111111,
        expiration_date: "12/29".to_string(),
        cvc: 123,
    }
}
