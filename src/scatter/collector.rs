//! Response collector: feeds replies from a reply queue into the registry.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use super::message::ResponseFragment;
use super::registry::CorrelationRegistry;
use crate::bus::{self, BusError, Delivery, MessageChannel, MessageHandler};

/// Consumer for one reply queue.
///
/// Each delivery is decoded and handed to the registry before the handler
/// returns, so the transport acks only after hand-off. Undecodable replies
/// are counted and rejected without requeue.
pub struct ResponseCollector {
    registry: Arc<CorrelationRegistry>,
}

impl ResponseCollector {
    pub fn new(registry: Arc<CorrelationRegistry>) -> Self {
        Self { registry }
    }
}

impl MessageHandler for ResponseCollector {
    fn handle(&self, delivery: Arc<Delivery>) -> BoxFuture<'static, bus::Result<()>> {
        let registry = self.registry.clone();
        Box::pin(async move {
            let fragment = match ResponseFragment::decode(&delivery.queue, &delivery.payload) {
                Ok(fragment) => fragment,
                Err(e) => {
                    registry.note_malformed();
                    warn!(queue = %delivery.queue, error = %e, "Dropping malformed reply");
                    return Err(BusError::Decode(e.to_string()));
                }
            };

            // Discards are logged and counted by the registry; the delivery
            // is still consumed.
            registry.deliver(fragment).await;
            Ok(())
        })
    }
}

/// Subscribe one collector per distinct reply queue.
///
/// Called once at boot; the consumers live until the channel shuts down.
pub async fn start_collectors<I, S>(
    channel: &Arc<dyn MessageChannel>,
    registry: &Arc<CorrelationRegistry>,
    reply_queues: I,
) -> bus::Result<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let queues: BTreeSet<String> = reply_queues.into_iter().map(Into::into).collect();
    for queue in queues {
        let collector = Arc::new(ResponseCollector::new(registry.clone()));
        channel.subscribe(&queue, collector).await?;
        info!(queue = %queue, "Response collector started");
    }
    Ok(())
}
