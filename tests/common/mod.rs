//! Shared utilities for integration tests.
//!
//! Builds a service over the in-memory channel and store, and simulates
//! sibling services that answer scatter requests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use user_service::bus::{BusError, Delivery, MemoryChannel, MessageChannel, MessageHandler};
use user_service::config::Config;
use user_service::scatter::{ScatterMessage, ScatterTarget};
use user_service::services::{ServiceContext, UserService};
use user_service::storage::{MemoryUserStore, UserRecord};

pub struct TestService {
    pub service: UserService,
    pub ctx: Arc<ServiceContext>,
    pub store: Arc<MemoryUserStore>,
    pub channel: Arc<MemoryChannel>,
}

/// Service wired to memory backends with consumers running.
pub async fn start_service(config: Config) -> TestService {
    let store = Arc::new(MemoryUserStore::new());
    let channel = Arc::new(MemoryChannel::new());
    let ctx = Arc::new(ServiceContext::from_config(
        store.clone(),
        channel.clone(),
        &config,
    ));
    ctx.start_consumers().await.expect("Failed to start consumers");

    TestService {
        service: UserService::new(ctx.clone()),
        ctx,
        store,
        channel,
    }
}

/// Config whose aggregation plans use the given targets and deadline.
pub fn config_with(targets: &[&str], timeout: Duration) -> Config {
    let targets: Vec<ScatterTarget> = targets.iter().map(|q| ScatterTarget::queue(*q)).collect();
    let mut config = Config::default();
    for plan in [
        &mut config.aggregation.retrieve_user_data,
        &mut config.aggregation.get_all_user_data,
    ] {
        plan.targets = targets.clone();
        plan.timeout_ms = timeout.as_millis() as u64;
    }
    config
}

/// Wait until `queue` has seen at least `count` publishes.
pub async fn wait_for_published(
    channel: &MemoryChannel,
    queue: &str,
    count: usize,
) -> Vec<Vec<u8>> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let sent = channel.published_to(queue).await;
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("publish never happened")
}

/// A sibling service listening on its own queue.
///
/// Answers every correlated request on `reply_queue` after `delay`. Named
/// siblings put their queue name in the reply's `service` field.
pub struct Sibling {
    name: String,
    reply_queue: String,
    data: serde_json::Value,
    delay: Duration,
    named: bool,
    channel: Arc<dyn MessageChannel>,
}

impl Sibling {
    pub async fn spawn(
        channel: Arc<dyn MessageChannel>,
        name: &str,
        reply_queue: &str,
        data: serde_json::Value,
        delay: Duration,
    ) {
        Self::start(channel, name, reply_queue, data, delay, true).await;
    }

    /// A sibling whose replies carry only `correlation_id` and `data`.
    pub async fn spawn_unnamed(
        channel: Arc<dyn MessageChannel>,
        name: &str,
        reply_queue: &str,
        data: serde_json::Value,
    ) {
        Self::start(channel, name, reply_queue, data, Duration::ZERO, false).await;
    }

    async fn start(
        channel: Arc<dyn MessageChannel>,
        name: &str,
        reply_queue: &str,
        data: serde_json::Value,
        delay: Duration,
        named: bool,
    ) {
        let sibling = Arc::new(Self {
            name: name.to_string(),
            reply_queue: reply_queue.to_string(),
            data,
            delay,
            named,
            channel: channel.clone(),
        });
        channel
            .subscribe(name, sibling)
            .await
            .expect("Failed to subscribe sibling");
    }
}

impl MessageHandler for Sibling {
    fn handle(&self, delivery: Arc<Delivery>) -> BoxFuture<'static, Result<(), BusError>> {
        let channel = self.channel.clone();
        let reply_queue = self.reply_queue.clone();
        let name = self.name.clone();
        let data = self.data.clone();
        let delay = self.delay;
        let named = self.named;
        Box::pin(async move {
            let message: ScatterMessage = serde_json::from_slice(&delivery.payload)
                .map_err(|e| BusError::Decode(e.to_string()))?;
            let Some(correlation_id) = message.correlation_id else {
                return Ok(());
            };

            tokio::time::sleep(delay).await;
            let reply = if named {
                serde_json::json!({
                    "correlation_id": correlation_id,
                    "service": name,
                    "data": data,
                })
            } else {
                serde_json::json!({
                    "correlation_id": correlation_id,
                    "data": data,
                })
            };
            channel
                .publish(&reply_queue, reply.to_string().as_bytes())
                .await
        })
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
