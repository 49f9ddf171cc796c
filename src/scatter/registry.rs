//! Correlation registry: in-flight scatter-gather operations.
//!
//! One entry per correlation key. An entry leaves `Pending` exactly once,
//! guarded by a compare-and-set on its own status; the registry map is only
//! locked to insert, look up, or remove entries.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::message::ResponseFragment;
use super::{Result, ScatterError};
use crate::utils::metrics;

/// Registry key: subject plus operation tag, e.g. `"<userId>:retrieve"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    pub fn new(subject_id: &str, tag: &str) -> Self {
        Self(format!("{}:{}", subject_id, tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Correlation id carried on the wire: `"<key>:<nonce>"`.
///
/// The nonce tells generations of the same key apart, so a late reply to a
/// finished operation is never counted toward a newer one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId {
    key: CorrelationKey,
    nonce: Uuid,
}

impl CorrelationId {
    pub fn new(key: CorrelationKey) -> Self {
        Self {
            key,
            nonce: Uuid::new_v4(),
        }
    }

    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.nonce)
    }
}

impl FromStr for CorrelationId {
    type Err = ScatterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (key, nonce) = s.rsplit_once(':').ok_or_else(|| {
            ScatterError::Malformed(format!("correlation id '{}' has no nonce", s))
        })?;
        let nonce = Uuid::parse_str(nonce)
            .map_err(|e| ScatterError::Malformed(format!("correlation id '{}': {}", s, e)))?;
        Ok(Self {
            key: CorrelationKey(key.to_string()),
            nonce,
        })
    }
}

/// Lifecycle of a correlation entry. Everything but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryStatus {
    Pending = 0,
    Complete = 1,
    TimedOut = 2,
    Failed = 3,
}

impl EntryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EntryStatus::Pending)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => EntryStatus::Pending,
            1 => EntryStatus::Complete,
            2 => EntryStatus::TimedOut,
            _ => EntryStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Complete => "complete",
            EntryStatus::TimedOut => "timed_out",
            EntryStatus::Failed => "failed",
        }
    }
}

/// Why a fragment was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// No entry for the key, or the entry belongs to another generation.
    Unknown,
    /// The entry already reached a terminal status.
    Terminal,
    /// The source is not among the expected responders.
    UnexpectedResponder,
    /// The responder already contributed.
    Duplicate,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::Unknown => "unknown",
            DiscardReason::Terminal => "terminal",
            DiscardReason::UnexpectedResponder => "unexpected_responder",
            DiscardReason::Duplicate => "duplicate",
        }
    }
}

/// Outcome of handing a fragment to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivered {
    /// Appended; `completed` is true when this fragment closed the entry.
    Accepted { completed: bool },
    Discarded(DiscardReason),
}

/// One in-flight scatter-gather operation.
pub struct CorrelationEntry {
    id: CorrelationId,
    expected: BTreeSet<String>,
    deadline: Instant,
    status: AtomicU8,
    collected: AsyncMutex<Vec<ResponseFragment>>,
    signal: watch::Sender<EntryStatus>,
}

impl CorrelationEntry {
    fn new(id: CorrelationId, expected: BTreeSet<String>, deadline: Instant) -> Self {
        let (signal, _) = watch::channel(EntryStatus::Pending);
        Self {
            id,
            expected,
            deadline,
            status: AtomicU8::new(EntryStatus::Pending as u8),
            collected: AsyncMutex::new(Vec::new()),
            signal,
        }
    }

    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn status(&self) -> EntryStatus {
        EntryStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Move `Pending -> to`. Returns false when another actor got there first.
    fn transition(&self, to: EntryStatus) -> bool {
        let won = self
            .status
            .compare_exchange(
                EntryStatus::Pending as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            self.signal.send_replace(to);
            metrics::record_terminal(to.as_str());
            debug!(correlation_id = %self.id, status = to.as_str(), "Correlation settled");
        }
        won
    }

    async fn offer(&self, fragment: ResponseFragment) -> Delivered {
        let mut collected = self.collected.lock().await;

        if self.status().is_terminal() {
            return Delivered::Discarded(DiscardReason::Terminal);
        }
        // Unnamed replies fill any open slot; named ones must match a
        // responder that has not answered by name yet.
        if fragment.named {
            if !self.expected.contains(&fragment.source_service) {
                return Delivered::Discarded(DiscardReason::UnexpectedResponder);
            }
            if collected
                .iter()
                .any(|f| f.named && f.source_service == fragment.source_service)
            {
                return Delivered::Discarded(DiscardReason::Duplicate);
            }
        }

        collected.push(fragment);
        let completed =
            collected.len() >= self.expected.len() && self.transition(EntryStatus::Complete);
        Delivered::Accepted { completed }
    }

    /// Close the entry as `TimedOut` if it is still pending.
    ///
    /// Holds the fragment lock so the collected set is frozen at the transition.
    pub async fn expire(&self) -> bool {
        let _collected = self.collected.lock().await;
        self.transition(EntryStatus::TimedOut)
    }

    async fn fail(&self) -> bool {
        let _collected = self.collected.lock().await;
        self.transition(EntryStatus::Failed)
    }
}

/// Final state of a correlation, handed to the caller exactly once.
#[derive(Debug, Clone)]
pub struct Settled {
    pub correlation_id: CorrelationId,
    pub status: EntryStatus,
    /// Arrival order.
    pub fragments: Vec<ResponseFragment>,
    /// Expected responders that never answered by name, sorted. Empty when
    /// complete. Unnamed replies cannot be attributed, so after a timeout
    /// this may list a responder that did answer without naming itself.
    pub missing: Vec<String>,
}

/// Tracks in-flight operations keyed by correlation key.
#[derive(Default)]
pub struct CorrelationRegistry {
    entries: Mutex<HashMap<CorrelationKey, Arc<CorrelationEntry>>>,
    discarded: AtomicU64,
    malformed: AtomicU64,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CorrelationKey, Arc<CorrelationEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open an entry for `id` expecting one fragment from each of `expected`.
    ///
    /// Starts the companion timer that expires the entry after `timeout`.
    /// Fails if an entry for the same key is still pending. An entry with no
    /// expected responders is complete immediately.
    pub fn register(
        self: &Arc<Self>,
        id: CorrelationId,
        expected: BTreeSet<String>,
        timeout: Duration,
    ) -> Result<PendingCorrelation> {
        let entry = Arc::new(CorrelationEntry::new(
            id.clone(),
            expected,
            Instant::now() + timeout,
        ));

        {
            let mut entries = self.entries();
            if let Some(existing) = entries.get(id.key()) {
                if !existing.status().is_terminal() {
                    return Err(ScatterError::InFlight(id.key().clone()));
                }
            }
            entries.insert(id.key().clone(), entry.clone());
        }

        if entry.expected.is_empty() {
            entry.transition(EntryStatus::Complete);
        }

        let timer = {
            let entry = entry.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(entry.deadline()).await;
                if entry.expire().await {
                    info!(correlation_id = %entry.id(), "Correlation timed out");
                }
            })
        };

        debug!(correlation_id = %id, expected = entry.expected.len(), "Correlation registered");

        Ok(PendingCorrelation {
            registry: self.clone(),
            signal: entry.signal.subscribe(),
            entry,
            timer,
        })
    }

    /// Hand a fragment to its entry.
    ///
    /// Fragments for unknown, stale, or terminal entries are dropped and
    /// counted; they never cause an error.
    pub async fn deliver(&self, fragment: ResponseFragment) -> Delivered {
        let correlation_id = fragment.correlation_id.clone();
        let source = fragment.source_service.clone();

        let entry = self
            .entries()
            .get(correlation_id.key())
            .filter(|e| e.id() == &correlation_id)
            .cloned();

        let outcome = match entry {
            Some(entry) => entry.offer(fragment).await,
            None => Delivered::Discarded(DiscardReason::Unknown),
        };

        match outcome {
            Delivered::Accepted { completed } => {
                debug!(
                    correlation_id = %correlation_id,
                    source = %source,
                    completed,
                    "Fragment accepted"
                );
            }
            Delivered::Discarded(reason) => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                metrics::record_discard(reason.as_str());
                warn!(
                    correlation_id = %correlation_id,
                    source = %source,
                    reason = reason.as_str(),
                    "Discarding fragment"
                );
            }
        }
        outcome
    }

    /// Count a reply that could not be decoded.
    pub fn note_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
        metrics::record_discard("malformed");
    }

    /// Fragments dropped because no live entry wanted them.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Replies dropped because they could not be decoded.
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Number of entries currently held, pending or awaiting their reader.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Remove the entry for `id`, unless a newer generation replaced it.
    fn remove(&self, id: &CorrelationId) {
        let mut entries = self.entries();
        if entries.get(id.key()).is_some_and(|e| e.id() == id) {
            entries.remove(id.key());
        }
    }
}

/// Caller's handle on a registered correlation.
///
/// Consumed by `wait`, so the settled result is read once. Dropping the
/// handle removes the entry and stops its timer.
pub struct PendingCorrelation {
    registry: Arc<CorrelationRegistry>,
    entry: Arc<CorrelationEntry>,
    signal: watch::Receiver<EntryStatus>,
    timer: JoinHandle<()>,
}

impl PendingCorrelation {
    pub fn id(&self) -> &CorrelationId {
        self.entry.id()
    }

    pub fn status(&self) -> EntryStatus {
        self.entry.status()
    }

    pub fn deadline(&self) -> Instant {
        self.entry.deadline()
    }

    /// Suspend until the entry is terminal, then take its fragments.
    pub async fn wait(mut self) -> Settled {
        // The sender lives in the entry we hold, so the channel cannot close.
        let _ = self.signal.wait_for(|status| status.is_terminal()).await;
        self.take().await
    }

    /// Mark the operation failed and release it.
    pub async fn fail(self) -> Settled {
        self.entry.fail().await;
        self.take().await
    }

    async fn take(self) -> Settled {
        let fragments = std::mem::take(&mut *self.entry.collected.lock().await);
        let status = self.entry.status();
        let missing = if status == EntryStatus::Complete {
            Vec::new()
        } else {
            self.entry
                .expected
                .iter()
                .filter(|r| !fragments.iter().any(|f| f.named && &f.source_service == *r))
                .cloned()
                .collect()
        };

        Settled {
            correlation_id: self.entry.id().clone(),
            status,
            fragments,
            missing,
        }
    }
}

impl Drop for PendingCorrelation {
    fn drop(&mut self) {
        self.timer.abort();
        self.registry.remove(self.entry.id());
    }
}
