//! Message channel for broker-based coordination with sibling services.
//!
//! This module contains:
//! - `MessageChannel` trait: publish to / subscribe on named queues
//! - `MessageHandler` trait: for processing deliveries
//! - Messaging configuration types
//! - Implementations: AMQP (RabbitMQ), in-memory channel

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::info;

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod memory;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::{AmqpChannel, AmqpConfig};
pub use memory::MemoryChannel;

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish to '{queue}' failed: {message}")]
    Publish { queue: String, message: String },

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// Payload could not be decoded. Never redelivered.
    #[error("Malformed message: {0}")]
    Decode(String),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Channel is shut down")]
    Closed,
}

impl BusError {
    /// Whether a delivery that failed with this error should go back on the queue.
    pub fn should_requeue(&self) -> bool {
        !matches!(self, BusError::Decode(_))
    }
}

/// A message taken off a queue.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Queue the message arrived on.
    pub queue: String,
    /// Raw message body (JSON by convention).
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn new(queue: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            queue: queue.into(),
            payload: payload.into(),
        }
    }
}

/// Handler for processing deliveries from a queue.
///
/// The delivery is acknowledged only after the returned future resolves `Ok`.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, delivery: Arc<Delivery>) -> BoxFuture<'static, Result<()>>;
}

/// Interface to the message broker.
///
/// Implementations:
/// - `AmqpChannel`: RabbitMQ via AMQP
/// - `MemoryChannel`: In-process queues for local runs and tests
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Publish one payload to a named queue.
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()>;

    /// Start a long-lived consumer on `queue` that feeds every delivery to `handler`.
    ///
    /// The consumer outlives the call; it stops only on `shutdown`.
    async fn subscribe(&self, queue: &str, handler: Arc<dyn MessageHandler>) -> Result<()>;

    /// Stop all consumers and release broker connections.
    async fn shutdown(&self);
}

// ============================================================================
// Configuration
// ============================================================================

/// Messaging type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// AMQP/RabbitMQ messaging.
    #[default]
    Amqp,
    /// In-process queues, nothing leaves the process.
    Memory,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// AMQP-specific configuration.
    pub amqp: AmqpBusConfig,
}

/// AMQP-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmqpBusConfig {
    /// AMQP connection URL.
    pub url: String,
    /// Maximum pooled broker connections.
    pub pool_size: usize,
    /// Publish attempts after the first one fails.
    pub publish_retries: usize,
}

impl Default for AmqpBusConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            pool_size: 10,
            publish_retries: 5,
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize the message channel based on configuration.
///
/// AMQP requires the `amqp` feature (included in default).
pub async fn init_channel(
    config: &MessagingConfig,
) -> std::result::Result<Arc<dyn MessageChannel>, Box<dyn std::error::Error + Send + Sync>> {
    match config.messaging_type {
        MessagingType::Amqp => {
            #[cfg(feature = "amqp")]
            {
                let channel = AmqpChannel::new(AmqpConfig::from(&config.amqp)).await?;
                info!(messaging_type = "amqp", "Message channel initialized");
                Ok(Arc::new(channel))
            }

            #[cfg(not(feature = "amqp"))]
            {
                Err("AMQP support requires the 'amqp' feature. Rebuild with --features amqp".into())
            }
        }
        MessagingType::Memory => {
            info!(messaging_type = "memory", "Message channel initialized");
            Ok(Arc::new(MemoryChannel::new()))
        }
    }
}
