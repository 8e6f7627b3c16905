//! Fixed-window request limiter keyed by client identity and tier
//!
//! Each `(client, tier)` pair owns a bucket holding a counter and the instant
//! its window ends. An expired bucket behaves exactly like a fresh one. The
//! counter is checked and incremented under one lock, so concurrent requests
//! can never push it past the tier limit.
//!
//! Uses `tokio::time::Instant` so paused-clock tests can advance windows.

use crate::config::{RateLimitSettings, TierLimit};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Policy tier, chosen by endpoint cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateTier {
    Standard,
    Strict,
}

impl std::fmt::Display for RateTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateTier::Standard => write!(f, "standard"),
            RateTier::Strict => write!(f, "strict"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u32,
    window_end: Instant,
}

/// Slot taken by an admitted request
///
/// Returned so a request rejected by a later admission check can give its
/// slot back with [`RateLimiter::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatePermit {
    client_id: String,
    tier: RateTier,
    window_end: Instant,
}

/// Process-wide limiter state
#[derive(Debug)]
pub struct RateLimiter {
    settings: RateLimitSettings,
    buckets: Mutex<HashMap<(String, RateTier), Bucket>>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn limit(&self, tier: RateTier) -> TierLimit {
        match tier {
            RateTier::Standard => self.settings.standard,
            RateTier::Strict => self.settings.strict,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, RateTier), Bucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check the budget and take one slot atomically
    ///
    /// # Returns
    /// * `Ok(permit)` - slot taken
    /// * `Err(retry_after)` - budget exhausted until the window ends
    pub fn try_acquire(&self, client_id: &str, tier: RateTier) -> Result<RatePermit, Duration> {
        let limit = self.limit(tier);
        let now = Instant::now();
        let mut buckets = self.lock();

        let bucket = buckets
            .entry((client_id.to_string(), tier))
            .or_insert(Bucket {
                count: 0,
                window_end: now + limit.window(),
            });

        if now >= bucket.window_end {
            bucket.count = 0;
            bucket.window_end = now + limit.window();
        }

        if bucket.count >= limit.requests {
            let retry_after = bucket.window_end.saturating_duration_since(now);
            debug!(
                client = %client_id,
                tier = %tier,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limit budget exhausted"
            );
            return Err(retry_after);
        }

        bucket.count += 1;
        Ok(RatePermit {
            client_id: client_id.to_string(),
            tier,
            window_end: bucket.window_end,
        })
    }

    /// Return a slot taken in the still-live window
    ///
    /// A permit from an already rolled window is ignored: the new window never
    /// counted it.
    pub fn release(&self, permit: RatePermit) {
        let mut buckets = self.lock();
        if let Some(bucket) = buckets.get_mut(&(permit.client_id, permit.tier)) {
            if bucket.window_end == permit.window_end && bucket.count > 0 {
                bucket.count -= 1;
            }
        }
    }

    /// Requests used in the live window (0 for expired or unknown buckets)
    pub fn used(&self, client_id: &str, tier: RateTier) -> u32 {
        let now = Instant::now();
        self.lock()
            .get(&(client_id.to_string(), tier))
            .filter(|b| now < b.window_end)
            .map(|b| b.count)
            .unwrap_or(0)
    }

    /// Drop expired buckets, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, b| now < b.window_end);
        before - buckets.len()
    }
}
