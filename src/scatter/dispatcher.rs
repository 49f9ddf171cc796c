//! Fan-out dispatcher: one logical request, one message per target queue.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::message::{Action, ScatterMessage};
use super::registry::{CorrelationId, CorrelationKey, CorrelationRegistry, PendingCorrelation};
use super::{Result, ScatterError};
use crate::bus::{BusError, MessageChannel};
use crate::utils::metrics;

/// A queue to publish to and the responder identity expected to answer.
///
/// Deserializes from a bare queue name or `{queue, responder}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "TargetSpec")]
pub struct ScatterTarget {
    pub queue: String,
    pub responder: String,
}

impl ScatterTarget {
    /// Target whose replies are attributed to the queue name itself.
    pub fn queue(queue: impl Into<String>) -> Self {
        let queue = queue.into();
        Self {
            responder: queue.clone(),
            queue,
        }
    }

    pub fn with_responder(queue: impl Into<String>, responder: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            responder: responder.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TargetSpec {
    Queue(String),
    Detailed {
        queue: String,
        #[serde(default)]
        responder: Option<String>,
    },
}

impl From<TargetSpec> for ScatterTarget {
    fn from(spec: TargetSpec) -> Self {
        match spec {
            TargetSpec::Queue(queue) => ScatterTarget::queue(queue),
            TargetSpec::Detailed { queue, responder } => match responder {
                Some(responder) => ScatterTarget::with_responder(queue, responder),
                None => ScatterTarget::queue(queue),
            },
        }
    }
}

/// A target the message could not be published to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishFailure {
    pub queue: String,
    pub error: String,
}

/// Per-target outcome of one fan-out. Every target is attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub attempted: usize,
    pub failures: Vec<PublishFailure>,
}

impl PublishReport {
    pub fn succeeded(&self) -> usize {
        self.attempted - self.failures.len()
    }

    /// True when there was at least one target and none accepted the message.
    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.failures.len() == self.attempted
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Publishes scatter messages and registers the correlations they open.
#[derive(Clone)]
pub struct FanOutDispatcher {
    channel: Arc<dyn MessageChannel>,
    registry: Arc<CorrelationRegistry>,
}

impl FanOutDispatcher {
    pub fn new(channel: Arc<dyn MessageChannel>, registry: Arc<CorrelationRegistry>) -> Self {
        Self { channel, registry }
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    /// Publish a correlated request to every target and return the handle
    /// to wait on.
    ///
    /// The correlation is registered before the first publish. Individual
    /// publish failures are reported, not fatal; if every target fails the
    /// correlation is closed as failed and `AllTargetsFailed` is returned.
    /// Publishes still running at the deadline are abandoned and reported as
    /// failures, so the call never outlives `timeout`.
    #[tracing::instrument(
        name = "scatter.dispatch",
        skip_all,
        fields(subject_id = %subject_id, action = %action, targets = targets.len())
    )]
    pub async fn dispatch(
        &self,
        subject_id: &str,
        action: Action,
        targets: &[ScatterTarget],
        timeout: Duration,
    ) -> Result<(PendingCorrelation, PublishReport)> {
        if !action.expects_reply() {
            return Err(ScatterError::NotCorrelated(action));
        }

        let id = CorrelationId::new(CorrelationKey::new(subject_id, action.tag()));
        let expected: BTreeSet<String> = targets.iter().map(|t| t.responder.clone()).collect();
        let pending = self.registry.register(id.clone(), expected, timeout)?;

        let message = ScatterMessage {
            subject_id: subject_id.to_string(),
            action,
            correlation_id: Some(id.to_string()),
        };
        let report = match message.to_json() {
            Ok(payload) => {
                self.publish_all(targets, &payload, Some(pending.deadline()))
                    .await
            }
            Err(e) => {
                pending.fail().await;
                return Err(e);
            }
        };

        if report.all_failed() {
            pending.fail().await;
            let queues: Vec<&str> = report.failures.iter().map(|f| f.queue.as_str()).collect();
            return Err(ScatterError::AllTargetsFailed(queues.join(", ")));
        }

        debug!(
            correlation_id = %id,
            published = report.succeeded(),
            failed = report.failures.len(),
            "Scatter dispatched"
        );
        Ok((pending, report))
    }

    /// Publish an uncorrelated message to every target. Nothing is awaited.
    #[tracing::instrument(
        name = "scatter.broadcast",
        skip_all,
        fields(subject_id = %subject_id, action = %action, targets = targets.len())
    )]
    pub async fn broadcast(
        &self,
        subject_id: &str,
        action: Action,
        targets: &[ScatterTarget],
    ) -> Result<PublishReport> {
        let message = ScatterMessage {
            subject_id: subject_id.to_string(),
            action,
            correlation_id: None,
        };
        let payload = message.to_json()?;
        Ok(self.publish_all(targets, &payload, None).await)
    }

    async fn publish_all(
        &self,
        targets: &[ScatterTarget],
        payload: &[u8],
        deadline: Option<Instant>,
    ) -> PublishReport {
        let results = join_all(targets.iter().map(|target| async move {
            let publish = self.channel.publish(&target.queue, payload);
            let result = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, publish)
                    .await
                    .unwrap_or_else(|_| {
                        Err(BusError::Publish {
                            queue: target.queue.clone(),
                            message: "deadline passed before publish completed".to_string(),
                        })
                    }),
                None => publish.await,
            };
            (target, result)
        }))
        .await;

        let mut report = PublishReport {
            attempted: targets.len(),
            failures: Vec::new(),
        };
        for (target, result) in results {
            metrics::record_publish(&target.queue, result.is_ok());
            if let Err(e) = result {
                warn!(queue = %target.queue, error = %e, "Fan-out publish failed");
                report.failures.push(PublishFailure {
                    queue: target.queue.clone(),
                    error: e.to_string(),
                });
            }
        }
        report
    }
}
