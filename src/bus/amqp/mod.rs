//! AMQP (RabbitMQ) message channel implementation.
//!
//! Publishes through the default exchange, so the routing key is the queue
//! name. Sibling services declare the same queues, non-durable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::BackoffBuilder;
use deadpool_lapin::{Manager, Pool, PoolError};
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicRejectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, Instrument};

use super::{AmqpBusConfig, BusError, Delivery, MessageChannel, MessageHandler, Result};
use crate::utils::retry::{consumer_backoff, publish_backoff};

/// Default exchange: routes by queue name.
const DEFAULT_EXCHANGE: &str = "";

/// Pause before a failed delivery goes back on the queue, so an unavailable
/// dependency is not hammered with immediate redeliveries.
const REQUEUE_DELAY: Duration = Duration::from_secs(1);

/// How a handled delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Ack,
    /// Dropped for good.
    Reject,
    /// Back on the queue after the delay.
    Requeue(Duration),
}

impl Settlement {
    fn for_outcome(outcome: &Result<()>) -> Self {
        match outcome {
            Ok(()) => Settlement::Ack,
            Err(e) if !e.should_requeue() => Settlement::Reject,
            Err(_) => Settlement::Requeue(REQUEUE_DELAY),
        }
    }
}

/// Configuration for AMQP connection.
#[derive(Clone, Debug)]
pub struct AmqpConfig {
    /// AMQP connection URL (e.g., amqp://localhost:5672).
    pub url: String,
    /// Maximum pooled connections.
    pub pool_size: usize,
    /// Publish attempts after the first one fails.
    pub publish_retries: usize,
}

impl AmqpConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_size: 10,
            publish_retries: 5,
        }
    }
}

impl From<&AmqpBusConfig> for AmqpConfig {
    fn from(config: &AmqpBusConfig) -> Self {
        Self {
            url: config.url.clone(),
            pool_size: config.pool_size,
            publish_retries: config.publish_retries,
        }
    }
}

/// Message channel backed by a pool of RabbitMQ connections.
///
/// Each publish attempt takes a fresh channel from the pool; the channel is
/// dropped (and closed) when the attempt ends, whatever the outcome.
pub struct AmqpChannel {
    pool: Pool,
    config: AmqpConfig,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl AmqpChannel {
    /// Connect to the broker and verify the connection.
    pub async fn new(config: AmqpConfig) -> Result<Self> {
        let manager = Manager::new(config.url.clone(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| BusError::Connection(format!("Failed to create pool: {}", e)))?;

        // Verify connection
        let conn = pool
            .get()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to connect: {}", e)))?;
        drop(conn);

        info!(url = %config.url, "Connected to AMQP");

        Ok(Self {
            pool,
            config,
            consumers: Mutex::new(Vec::new()),
        })
    }

    /// Get a channel from the pool.
    async fn get_channel(pool: &Pool) -> Result<Channel> {
        let conn = pool.get().await.map_err(|e: PoolError| {
            BusError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))
    }

    async fn declare_queue(channel: &Channel, queue: &str) -> Result<()> {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                BusError::Connection(format!("Failed to declare queue {}: {}", queue, e))
            })?;
        Ok(())
    }

    async fn publish_once(&self, queue: &str, payload: &[u8]) -> Result<()> {
        let channel = Self::get_channel(&self.pool).await?;
        Self::declare_queue(&channel, queue).await?;

        let properties = BasicProperties::default().with_content_type("application/json".into());

        let confirm = channel
            .basic_publish(
                DEFAULT_EXCHANGE,
                queue,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| BusError::Publish {
                queue: queue.to_string(),
                message: format!("Failed to publish: {}", e),
            })?;

        confirm.await.map_err(|e| BusError::Publish {
            queue: queue.to_string(),
            message: format!("Publish confirmation failed: {}", e),
        })?;

        Ok(())
    }

    /// Consumer loop with automatic reconnection and exponential backoff with jitter.
    async fn consume_with_reconnect(pool: Pool, queue: String, handler: Arc<dyn MessageHandler>) {
        use futures::StreamExt;

        let backoff_builder = consumer_backoff();
        let mut backoff_iter = backoff_builder.build();

        loop {
            match Self::setup_consumer(&pool, &queue).await {
                Ok(mut consumer) => {
                    info!(queue = %queue, "Consumer connected, processing messages");
                    // Reset backoff on successful connection
                    backoff_iter = backoff_builder.build();

                    while let Some(delivery) = consumer.next().await {
                        match delivery {
                            Ok(delivery) => {
                                Self::process_delivery(&queue, delivery, &handler).await;
                            }
                            Err(e) => {
                                error!(
                                    queue = %queue,
                                    error = %e,
                                    "Consumer delivery error, will reconnect"
                                );
                                break;
                            }
                        }
                    }

                    info!(queue = %queue, "Consumer stream ended, reconnecting...");
                }
                Err(e) => {
                    let delay = backoff_iter.next().unwrap_or(Duration::from_secs(30));
                    error!(
                        error = %e,
                        backoff_ms = %delay.as_millis(),
                        queue = %queue,
                        "Failed to set up consumer, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            // Brief pause before reconnecting after stream end (not error)
            let delay = backoff_iter.next().unwrap_or(Duration::from_secs(30));
            tokio::time::sleep(delay).await;
        }
    }

    async fn setup_consumer(pool: &Pool, queue: &str) -> Result<lapin::Consumer> {
        let channel = Self::get_channel(pool).await?;
        Self::declare_queue(&channel, queue).await?;

        channel
            .basic_consume(
                queue,
                &format!("user-service-{}", queue),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to start consumer: {}", e)))
    }

    /// Hand one delivery to the handler, then settle it with the broker.
    async fn process_delivery(
        queue: &str,
        delivery: lapin::message::Delivery,
        handler: &Arc<dyn MessageHandler>,
    ) {
        let message = Arc::new(Delivery::new(queue, delivery.data.clone()));
        let span = tracing::info_span!("bus.consume", queue = %queue);

        let outcome = handler.handle(message).instrument(span).await;

        match Settlement::for_outcome(&outcome) {
            Settlement::Ack => {
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    error!(queue = %queue, error = %e, "Failed to ack message");
                }
            }
            Settlement::Reject => {
                if let Err(e) = &outcome {
                    error!(queue = %queue, error = %e, "Rejecting undecodable message");
                }
                let _ = delivery
                    .reject(BasicRejectOptions { requeue: false })
                    .await;
            }
            Settlement::Requeue(delay) => {
                if let Err(e) = &outcome {
                    error!(
                        queue = %queue,
                        error = %e,
                        delay_ms = %delay.as_millis(),
                        "Handler failed, requeueing message"
                    );
                }
                tokio::time::sleep(delay).await;
                let _ = delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await;
            }
        }
    }
}

#[async_trait]
impl MessageChannel for AmqpChannel {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(queue = %queue))]
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        let backoff = publish_backoff(self.config.publish_retries).build();
        let mut last_error = None;

        for (attempt, delay) in std::iter::once(Duration::ZERO).chain(backoff).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }

            match self.publish_once(queue, payload).await {
                Ok(()) => {
                    debug!(queue = %queue, bytes = payload.len(), "Published message");
                    return Ok(());
                }
                Err(e) => {
                    error!(
                        attempt = attempt + 1,
                        max_retries = self.config.publish_retries,
                        error = %e,
                        "Publish failed, retrying..."
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BusError::Publish {
            queue: queue.to_string(),
            message: "Max retries exceeded".to_string(),
        }))
    }

    async fn subscribe(&self, queue: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let pool = self.pool.clone();
        let queue_name = queue.to_string();

        let task = tokio::spawn(async move {
            Self::consume_with_reconnect(pool, queue_name, handler).await;
        });
        self.consumers.lock().await.push(task);

        info!(queue = %queue, "Subscribed");
        Ok(())
    }

    async fn shutdown(&self) {
        for task in self.consumers.lock().await.drain(..) {
            task.abort();
        }
        self.pool.close();
        info!("AMQP channel shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_bus_config() {
        let bus = AmqpBusConfig {
            url: "amqp://rabbit:5672".to_string(),
            pool_size: 3,
            publish_retries: 1,
        };
        let config = AmqpConfig::from(&bus);
        assert_eq!(config.url, "amqp://rabbit:5672");
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.publish_retries, 1);
    }

    #[test]
    fn test_settlement_per_outcome() {
        assert_eq!(Settlement::for_outcome(&Ok(())), Settlement::Ack);
        assert_eq!(
            Settlement::for_outcome(&Err(BusError::Decode("bad json".into()))),
            Settlement::Reject
        );
        assert_eq!(
            Settlement::for_outcome(&Err(BusError::Handler("store down".into()))),
            Settlement::Requeue(REQUEUE_DELAY)
        );
        assert!(REQUEUE_DELAY > Duration::ZERO);
    }

    #[test]
    fn test_new_config_defaults() {
        let config = AmqpConfig::new("amqp://localhost:5672");
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.publish_retries, 5);
    }
}
