//! Cross-service scatter-gather.
//!
//! One request fans out to several sibling services over the message
//! channel; their replies are correlated back to the originating call,
//! collected until every expected responder answered or the deadline
//! passed, and merged with the locally held record.
//!
//! - `message`: wire envelopes (`ScatterMessage`, `ResponseFragment`)
//! - `registry`: `CorrelationRegistry`, one entry per in-flight operation
//! - `dispatcher`: `FanOutDispatcher`, correlated and fire-and-forget fan-out
//! - `collector`: `ResponseCollector`, long-lived consumer per reply queue
//! - `aggregate`: `AggregateResult`, the merged outcome

mod aggregate;
mod collector;
mod dispatcher;
mod message;
mod registry;

pub use aggregate::{AggregatePart, AggregateResult, LOCAL_SOURCE};
pub use collector::{start_collectors, ResponseCollector};
pub use dispatcher::{FanOutDispatcher, PublishFailure, PublishReport, ScatterTarget};
pub use message::{Action, ResponseFragment, ScatterMessage};
pub use registry::{
    CorrelationEntry, CorrelationId, CorrelationKey, CorrelationRegistry, Delivered,
    DiscardReason, EntryStatus, PendingCorrelation, Settled,
};

use tonic::Status;

use crate::storage::StorageError;

/// Result type for scatter-gather operations.
pub type Result<T> = std::result::Result<T, ScatterError>;

/// Errors raised by the scatter-gather layer.
#[derive(Debug, thiserror::Error)]
pub enum ScatterError {
    /// An operation for the same key has not reached a terminal status yet.
    #[error("Operation already in flight: {0}")]
    InFlight(CorrelationKey),

    /// Every target rejected the publish; nothing was sent.
    #[error("All fan-out targets failed: {0}")]
    AllTargetsFailed(String),

    /// Deadline passed before any responder answered.
    #[error("No data found for {0}")]
    NotFound(String),

    /// The action is fire-and-forget and cannot open a correlation.
    #[error("Action {0} takes no replies")]
    NotCorrelated(Action),

    #[error("Operation failed: {0}")]
    Failed(CorrelationId),

    #[error("Malformed reply: {0}")]
    Malformed(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<ScatterError> for Status {
    fn from(err: ScatterError) -> Self {
        match err {
            ScatterError::InFlight(key) => {
                Status::already_exists(format!("Operation already in flight: {key}"))
            }
            ScatterError::AllTargetsFailed(message) => {
                Status::unavailable(format!("All fan-out targets failed: {message}"))
            }
            ScatterError::NotFound(subject) => {
                Status::not_found(format!("No data found for {subject}"))
            }
            ScatterError::Storage(e) => e.into(),
            e @ (ScatterError::NotCorrelated(_)
            | ScatterError::Failed(_)
            | ScatterError::Malformed(_)
            | ScatterError::Encode(_)) => {
                Status::internal(e.to_string())
            }
        }
    }
}
