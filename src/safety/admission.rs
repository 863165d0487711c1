//! Admission Controller
//!
//! Enforces a minimum gap between requests from the same client. The check
//! gates admission, not success: an admitted request counts against the
//! window even if generation later fails.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::memory::ClientStateStore;

/// Minimum spacing between two admitted requests from one client.
pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { retry_after_secs: u64 },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<ClientStateStore>,
    min_interval: Duration,
}

impl AdmissionController {
    pub fn new(store: Arc<ClientStateStore>) -> Self {
        Self::with_interval(store, MIN_REQUEST_INTERVAL)
    }

    pub fn with_interval(store: Arc<ClientStateStore>, min_interval: Duration) -> Self {
        Self { store, min_interval }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Admits the request and records `now`, or reports how long to wait.
    pub async fn check_and_record(&self, client: &str, now: Instant) -> Admission {
        match self.store.admit_at(client, now, self.min_interval).await {
            Ok(()) => Admission::Allowed,
            Err(remaining) => Admission::Denied {
                retry_after_secs: ceil_secs(remaining),
            },
        }
    }
}

fn ceil_secs(remaining: Duration) -> u64 {
    // Round on the full precision so a sub-millisecond remainder still waits 1s.
    remaining.as_nanos().div_ceil(1_000_000_000) as u64
}
