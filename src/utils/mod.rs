//! Process-wide helpers: startup, backoff policies, metrics.

pub mod bootstrap;
pub mod metrics;
pub mod retry;
