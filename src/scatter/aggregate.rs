//! Aggregation result builder.

use serde_json::Value;
use tracing::info;

use super::registry::{EntryStatus, Settled};
use super::{Result, ScatterError};
use crate::storage::UserRecord;

/// Source name of the locally held record in a merged result.
pub const LOCAL_SOURCE: &str = "local";

/// One contribution to a merged result.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatePart {
    pub source: String,
    pub data: Value,
}

impl AggregatePart {
    /// Render the part as text: strings as-is, anything else as JSON.
    pub fn text(&self) -> String {
        match &self.data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Merged outcome of a scatter-gather operation.
///
/// Parts are ordered local record first, then fragments in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub subject_id: String,
    pub status: EntryStatus,
    pub parts: Vec<AggregatePart>,
    /// Responders that did not answer before the deadline, sorted.
    pub missing: Vec<String>,
}

impl AggregateResult {
    /// Merge a settled correlation with the optional local record.
    ///
    /// - `Complete`: every part.
    /// - `TimedOut` with no fragment: `NotFound`.
    /// - `TimedOut` with some fragments: partial result naming the missing responders.
    /// - `Failed`: error.
    pub fn build(subject_id: &str, settled: Settled, local: Option<&UserRecord>) -> Result<Self> {
        match settled.status {
            EntryStatus::Complete => {}
            EntryStatus::TimedOut if settled.fragments.is_empty() => {
                info!(
                    correlation_id = %settled.correlation_id,
                    missing = ?settled.missing,
                    "No responder answered before the deadline"
                );
                return Err(ScatterError::NotFound(subject_id.to_string()));
            }
            EntryStatus::TimedOut => {
                info!(
                    correlation_id = %settled.correlation_id,
                    missing = ?settled.missing,
                    "Returning partial aggregate"
                );
            }
            EntryStatus::Failed | EntryStatus::Pending => {
                return Err(ScatterError::Failed(settled.correlation_id));
            }
        }

        let mut parts = Vec::with_capacity(settled.fragments.len() + 1);
        if let Some(record) = local {
            parts.push(AggregatePart {
                source: LOCAL_SOURCE.to_string(),
                data: serde_json::to_value(record)?,
            });
        }
        parts.extend(settled.fragments.into_iter().map(|f| AggregatePart {
            source: f.source_service,
            data: f.payload,
        }));

        Ok(Self {
            subject_id: subject_id.to_string(),
            status: settled.status,
            parts,
            missing: settled.missing,
        })
    }

    pub fn is_partial(&self) -> bool {
        self.status == EntryStatus::TimedOut
    }

    /// Parts that came from sibling services.
    pub fn remote_parts(&self) -> impl Iterator<Item = &AggregatePart> {
        self.parts.iter().filter(|p| p.source != LOCAL_SOURCE)
    }

    /// Concatenate every part's text in merge order.
    pub fn joined(&self) -> String {
        self.parts.iter().map(AggregatePart::text).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scatter::message::ResponseFragment;
    use crate::scatter::registry::{CorrelationId, CorrelationKey};
    use chrono::Utc;
    use serde_json::json;

    fn settled(status: EntryStatus, sources: &[&str], missing: &[&str]) -> Settled {
        let id = CorrelationId::new(CorrelationKey::new("u1", "all"));
        Settled {
            fragments: sources
                .iter()
                .map(|s| ResponseFragment {
                    correlation_id: id.clone(),
                    source_service: s.to_string(),
                    named: true,
                    payload: json!(format!("<{}>", s)),
                    received_at: Utc::now(),
                })
                .collect(),
            correlation_id: id,
            status,
            missing: missing.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_local_record_comes_first() {
        let local = UserRecord {
            email: "ada@example.com".to_string(),
            ..Default::default()
        };
        let result = AggregateResult::build(
            "u1",
            settled(EntryStatus::Complete, &["authz", "auth"], &[]),
            Some(&local),
        )
        .unwrap();

        let sources: Vec<_> = result.parts.iter().map(|p| p.source.as_str()).collect();
        assert_eq!(sources, vec![LOCAL_SOURCE, "authz", "auth"]);
        assert_eq!(result.parts[0].data["email"], "ada@example.com");
        assert!(!result.is_partial());
        assert_eq!(result.remote_parts().count(), 2);
    }

    #[test]
    fn test_timeout_without_fragments_is_not_found() {
        let err = AggregateResult::build("u1", settled(EntryStatus::TimedOut, &[], &["auth"]), None)
            .unwrap_err();
        assert!(matches!(err, ScatterError::NotFound(subject) if subject == "u1"));
    }

    #[test]
    fn test_timeout_with_fragments_is_partial() {
        let result = AggregateResult::build(
            "u1",
            settled(EntryStatus::TimedOut, &["auth"], &["authz"]),
            None,
        )
        .unwrap();
        assert!(result.is_partial());
        assert_eq!(result.missing, vec!["authz".to_string()]);
        assert_eq!(result.joined(), "<auth>");
    }

    #[test]
    fn test_failed_is_error() {
        let err = AggregateResult::build("u1", settled(EntryStatus::Failed, &[], &[]), None)
            .unwrap_err();
        assert!(matches!(err, ScatterError::Failed(_)));
    }

    #[test]
    fn test_joined_keeps_strings_unquoted() {
        let result = AggregateResult {
            subject_id: "u1".to_string(),
            status: EntryStatus::Complete,
            parts: vec![
                AggregatePart {
                    source: "a".to_string(),
                    data: json!("plain"),
                },
                AggregatePart {
                    source: "b".to_string(),
                    data: json!({"n": 1}),
                },
            ],
            missing: vec![],
        };
        assert_eq!(result.joined(), r#"plain{"n":1}"#);
    }
}
