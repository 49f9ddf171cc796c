//! Wire envelopes exchanged with sibling services.
//!
//! Outbound messages always carry the subject under `user_id`; inbound
//! decoders also accept `userId`, which some producers emit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::registry::CorrelationId;
use super::{Result, ScatterError};

/// Verbs the sibling services understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    /// Purge everything held about the subject. Fire-and-forget.
    DeleteAllRecords,
    /// Ask for the subject's data held by a sibling.
    RetrieveUserData,
    /// Ask for every record a sibling holds about the subject.
    GetAllRecords,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::DeleteAllRecords => "deleteAllRecords",
            Action::RetrieveUserData => "retrieveUserData",
            Action::GetAllRecords => "getAllRecords",
        }
    }

    /// Whether receivers answer on a reply queue.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Action::DeleteAllRecords)
    }

    /// Operation tag used in correlation keys.
    pub fn tag(&self) -> &'static str {
        match self {
            Action::DeleteAllRecords => "delete",
            Action::RetrieveUserData => "retrieve",
            Action::GetAllRecords => "all",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope placed on each outbound queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScatterMessage {
    #[serde(rename = "user_id", alias = "userId")]
    pub subject_id: String,
    pub action: Action,
    /// Absent for fire-and-forget messages.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "correlationId")]
    pub correlation_id: Option<String>,
}

impl ScatterMessage {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Reply body as produced by a sibling service.
#[derive(Debug, Deserialize)]
struct ReplyEnvelope {
    #[serde(alias = "correlationId")]
    correlation_id: String,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

/// One service's contribution to an aggregated response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFragment {
    pub correlation_id: CorrelationId,
    pub source_service: String,
    /// Whether the reply named its service. Unnamed replies carry the reply
    /// queue as `source_service` and only count toward the expected total.
    pub named: bool,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl ResponseFragment {
    /// Decode a reply that arrived on `queue`.
    ///
    /// Replies that do not name their service are attributed to the queue.
    pub fn decode(queue: &str, bytes: &[u8]) -> Result<Self> {
        let envelope: ReplyEnvelope =
            serde_json::from_slice(bytes).map_err(|e| ScatterError::Malformed(e.to_string()))?;
        let correlation_id = envelope.correlation_id.parse()?;
        let service = envelope.service.filter(|s| !s.is_empty());

        Ok(Self {
            correlation_id,
            named: service.is_some(),
            source_service: service.unwrap_or_else(|| queue.to_string()),
            payload: envelope.data,
            received_at: Utc::now(),
        })
    }
}
