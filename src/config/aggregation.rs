//! Fan-out plans for the aggregating and cascading operations.

use std::time::Duration;

use serde::Deserialize;

use crate::scatter::ScatterTarget;

/// One scatter-gather operation: who is asked, where replies land, how long
/// to wait.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AggregationPlan {
    pub targets: Vec<ScatterTarget>,
    pub reply_queue: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Merge the locally stored record ahead of the fragments.
    #[serde(default)]
    pub include_local_record: bool,
}

fn default_timeout_ms() -> u64 {
    5000
}

impl AggregationPlan {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Plans for the two aggregating RPCs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub retrieve_user_data: AggregationPlan,
    pub get_all_user_data: AggregationPlan,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            retrieve_user_data: AggregationPlan {
                targets: vec![
                    ScatterTarget::queue("service1_queue"),
                    ScatterTarget::queue("service2_queue"),
                ],
                reply_queue: "userData_queue".to_string(),
                timeout_ms: default_timeout_ms(),
                include_local_record: false,
            },
            get_all_user_data: AggregationPlan {
                targets: sibling_queues(),
                reply_queue: "user_data".to_string(),
                timeout_ms: default_timeout_ms(),
                include_local_record: true,
            },
        }
    }
}

impl AggregationConfig {
    /// Every queue a response collector must consume.
    pub fn reply_queues(&self) -> Vec<String> {
        vec![
            self.retrieve_user_data.reply_queue.clone(),
            self.get_all_user_data.reply_queue.clone(),
        ]
    }
}

/// Services notified when a user is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    pub targets: Vec<ScatterTarget>,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            targets: sibling_queues(),
        }
    }
}

/// The service's own command queue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InboundConfig {
    pub queue: String,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            queue: "user_queue".to_string(),
        }
    }
}

fn sibling_queues() -> Vec<ScatterTarget> {
    ["auth_queue", "authz_queue", "watch_history_queue"]
        .into_iter()
        .map(ScatterTarget::queue)
        .collect()
}
