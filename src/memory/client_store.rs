//! Client State Store
//!
//! Per-client rate timestamps and recent-output history, held in process
//! memory. Every accessor, including the periodic sweep, goes through the same
//! lock so per-client updates are linearized.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Outputs kept per client for prompt context.
pub const HISTORY_CAPACITY: usize = 2;

/// How long records survive without activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Rate records older than this are dropped by `sweep`.
    pub rate_ttl: Duration,
    /// History records inactive longer than this are dropped by `sweep`.
    pub history_ttl: Duration,
    pub history_capacity: usize,
}

impl RetentionPolicy {
    /// Rate records expire after ten admission intervals; history after 30 minutes.
    pub fn for_interval(min_interval: Duration) -> Self {
        Self {
            rate_ttl: min_interval * 10,
            history_ttl: Duration::from_secs(30 * 60),
            history_capacity: HISTORY_CAPACITY,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::for_interval(crate::safety::MIN_REQUEST_INTERVAL)
    }
}

#[derive(Debug, Clone)]
struct RateRecord {
    last_request_at: Instant,
}

#[derive(Debug, Clone)]
struct HistoryRecord {
    recent_outputs: VecDeque<String>,
    last_activity_at: Instant,
}

#[derive(Default)]
struct StoreInner {
    rates: HashMap<String, RateRecord>,
    histories: HashMap<String, HistoryRecord>,
}

/// Record counts, used for logging and health output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub rate_records: usize,
    pub history_records: usize,
}

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub before: StoreStats,
    pub after: StoreStats,
}

pub struct ClientStateStore {
    inner: Mutex<StoreInner>,
    policy: RetentionPolicy,
}

impl ClientStateStore {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            policy,
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Atomically compares against the last admitted request and records `now`
    /// when the gap is at least `min_interval`. Returns the remaining wait on denial.
    pub(crate) async fn admit_at(
        &self,
        client: &str,
        now: Instant,
        min_interval: Duration,
    ) -> Result<(), Duration> {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.rates.get(client) {
            let elapsed = now.saturating_duration_since(record.last_request_at);
            if elapsed < min_interval {
                return Err(min_interval - elapsed);
            }
        }
        inner
            .rates
            .insert(client.to_string(), RateRecord { last_request_at: now });
        Ok(())
    }

    /// Recent outputs for `client`, oldest first.
    pub async fn history(&self, client: &str) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .histories
            .get(client)
            .map(|record| record.recent_outputs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Appends an output, evicting the oldest one once capacity is reached.
    pub async fn append_history(&self, client: &str, text: impl Into<String>, now: Instant) {
        let capacity = self.policy.history_capacity;
        let mut inner = self.inner.lock().await;
        let record = inner
            .histories
            .entry(client.to_string())
            .or_insert_with(|| HistoryRecord {
                recent_outputs: VecDeque::with_capacity(capacity),
                last_activity_at: now,
            });
        record.recent_outputs.push_back(text.into());
        while record.recent_outputs.len() > capacity {
            record.recent_outputs.pop_front();
        }
        record.last_activity_at = record.last_activity_at.max(now);
    }

    pub async fn clear_history(&self, client: &str) {
        let mut inner = self.inner.lock().await;
        if inner.histories.remove(client).is_some() {
            debug!("Cleared history for {}", client);
        }
    }

    /// Refreshes the activity timestamp of an existing history record.
    pub async fn touch(&self, client: &str, now: Instant) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.histories.get_mut(client) {
            record.last_activity_at = record.last_activity_at.max(now);
        }
    }

    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.lock().await;
        inner.stats()
    }

    /// Drops stale rate records and inactive histories.
    pub async fn sweep(&self, now: Instant) -> SweepReport {
        let policy = self.policy;
        let mut inner = self.inner.lock().await;
        let before = inner.stats();

        inner
            .rates
            .retain(|_, r| now.saturating_duration_since(r.last_request_at) <= policy.rate_ttl);

        let expired: Vec<String> = inner
            .histories
            .iter()
            .filter(|(_, h)| now.saturating_duration_since(h.last_activity_at) > policy.history_ttl)
            .map(|(client, _)| client.clone())
            .collect();
        for client in expired {
            inner.histories.remove(&client);
            inner.rates.remove(&client);
        }

        SweepReport {
            before,
            after: inner.stats(),
        }
    }
}

impl StoreInner {
    fn stats(&self) -> StoreStats {
        StoreStats {
            rate_records: self.rates.len(),
            history_records: self.histories.len(),
        }
    }
}

impl Default for ClientStateStore {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}
