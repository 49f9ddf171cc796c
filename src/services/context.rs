//! Handles shared by every RPC and consumer.

use std::sync::Arc;

use tracing::info;

use crate::bus::{self, MessageChannel};
use crate::config::{AggregationConfig, CascadeConfig, Config, InboundConfig};
use crate::handlers::InboundHandler;
use crate::scatter::{start_collectors, CorrelationRegistry, FanOutDispatcher};
use crate::storage::UserStore;

/// Explicitly constructed service state.
///
/// Opened once at process start and passed down; nothing here is global.
pub struct ServiceContext {
    pub store: Arc<dyn UserStore>,
    pub channel: Arc<dyn MessageChannel>,
    pub registry: Arc<CorrelationRegistry>,
    pub dispatcher: FanOutDispatcher,
    pub aggregation: AggregationConfig,
    pub cascade: CascadeConfig,
    pub inbound: InboundConfig,
}

impl ServiceContext {
    pub fn new(
        store: Arc<dyn UserStore>,
        channel: Arc<dyn MessageChannel>,
        aggregation: AggregationConfig,
        cascade: CascadeConfig,
        inbound: InboundConfig,
    ) -> Self {
        let registry = Arc::new(CorrelationRegistry::new());
        let dispatcher = FanOutDispatcher::new(channel.clone(), registry.clone());
        Self {
            store,
            channel,
            registry,
            dispatcher,
            aggregation,
            cascade,
            inbound,
        }
    }

    pub fn from_config(
        store: Arc<dyn UserStore>,
        channel: Arc<dyn MessageChannel>,
        config: &Config,
    ) -> Self {
        Self::new(
            store,
            channel,
            config.aggregation.clone(),
            config.cascade.clone(),
            config.inbound.clone(),
        )
    }

    /// Start the long-lived consumers: one response collector per reply
    /// queue and the inbound command consumer.
    pub async fn start_consumers(&self) -> bus::Result<()> {
        start_collectors(&self.channel, &self.registry, self.aggregation.reply_queues()).await?;

        let inbound = Arc::new(InboundHandler::new(self.store.clone()));
        self.channel.subscribe(&self.inbound.queue, inbound).await?;
        info!(queue = %self.inbound.queue, "Inbound consumer started");
        Ok(())
    }

    /// Stop consumers and release the broker connection.
    pub async fn shutdown(&self) {
        self.channel.shutdown().await;
        info!(in_flight = self.registry.len(), "Service context shut down");
    }
}
