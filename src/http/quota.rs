use log::debug;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Quota fields as reported by one response. Every field is optional; a
/// missing or malformed header just means "unknown for this response".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub used: Option<u32>,
    /// Epoch seconds.
    pub reset: Option<i64>,
    /// Pool the server charged the call to (`x-ratelimit-resource`).
    pub resource: Option<String>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

impl QuotaHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            limit: header_str(headers, "x-ratelimit-limit").and_then(|s| s.parse().ok()),
            remaining: header_str(headers, "x-ratelimit-remaining").and_then(|s| s.parse().ok()),
            used: header_str(headers, "x-ratelimit-used").and_then(|s| s.parse().ok()),
            reset: header_str(headers, "x-ratelimit-reset")
                .and_then(|s| s.parse().ok())
                .filter(|r: &i64| *r > 0),
            resource: header_str(headers, "x-ratelimit-resource")
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }
}

/// Last known quota of one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub limit: u32,
    pub remaining: u32,
    pub used: Option<u32>,
    pub reset_at_epoch_seconds: i64,
    /// Epoch milliseconds of the response that last updated this record.
    pub last_observed_at: i64,
}

impl QuotaState {
    fn window_over(&self, now_ms: i64) -> bool {
        now_ms >= self.reset_at_epoch_seconds.saturating_mul(1000)
    }

    pub fn reset_at_rfc3339(&self) -> Option<String> {
        chrono::DateTime::<chrono::Utc>::from_timestamp(self.reset_at_epoch_seconds, 0)
            .map(|d| d.to_rfc3339())
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Time from `now_ms` until `reset` (epoch seconds), zero once it has
/// passed. `None` when `reset` is not a usable epoch.
pub fn until_reset(reset: i64, now_ms: i64) -> Option<Duration> {
    if reset <= 0 {
        return None;
    }
    let reset_ms = reset.checked_mul(1000)?;
    let wait_ms = reset_ms.saturating_sub(now_ms).max(0);
    Some(Duration::from_millis(wait_ms as u64))
}

type PoolSlot = Arc<Mutex<Option<QuotaState>>>;

/// Tracks quota per named pool and advises how long to hold off.
///
/// One governor per credential/base-URL pair, shared by every executor using
/// that pair. Each pool has its own lock; the outer map lock is held only to
/// look up or insert a slot.
#[derive(Debug, Default)]
pub struct RateLimitGovernor {
    pools: Mutex<HashMap<String, PoolSlot>>,
}

impl RateLimitGovernor {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, pool: &str) -> PoolSlot {
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        pools.entry(pool.to_string()).or_default().clone()
    }

    fn existing_slot(&self, pool: &str) -> Option<PoolSlot> {
        let pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        pools.get(pool).cloned()
    }

    /// Record the quota a response reported. Returns false (state untouched)
    /// when the response carried no remaining count.
    pub fn observe(&self, pool: &str, headers: &QuotaHeaders) -> bool {
        self.observe_at(pool, headers, now_millis())
    }

    pub fn observe_at(&self, pool: &str, headers: &QuotaHeaders, now_ms: i64) -> bool {
        let Some(remaining) = headers.remaining else {
            return false;
        };
        let slot = self.slot(pool);
        let mut state = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let prev = state.take();
        let limit = headers
            .limit
            .or(prev.as_ref().map(|p| p.limit))
            .unwrap_or(remaining)
            .max(remaining);
        let next = QuotaState {
            limit,
            remaining,
            used: headers.used.or(prev.as_ref().and_then(|p| p.used)),
            reset_at_epoch_seconds: headers
                .reset
                .or(prev.as_ref().map(|p| p.reset_at_epoch_seconds))
                .unwrap_or(0),
            last_observed_at: now_ms,
        };
        debug!(
            "quota[{}] remaining={}/{} reset={}",
            pool, next.remaining, next.limit, next.reset_at_epoch_seconds
        );
        *state = Some(next);
        true
    }

    /// Locally account for a request about to be sent. The next response's
    /// headers override whatever this predicts.
    pub fn reserve(&self, pool: &str) {
        self.reserve_at(pool, now_millis());
    }

    pub fn reserve_at(&self, pool: &str, now_ms: i64) {
        let Some(slot) = self.existing_slot(pool) else {
            return;
        };
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = guard.as_mut() {
            if state.window_over(now_ms) {
                state.remaining = state.limit;
            }
            state.remaining = state.remaining.saturating_sub(1);
        }
    }

    /// Wait required before the next call on `pool`, if its quota is spent
    /// and the window has not reset yet.
    pub fn must_wait(&self, pool: &str) -> Option<Duration> {
        self.must_wait_at(pool, now_millis())
    }

    pub fn must_wait_at(&self, pool: &str, now_ms: i64) -> Option<Duration> {
        let slot = self.existing_slot(pool)?;
        let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let state = guard.as_ref()?;
        if state.remaining > 0 || state.window_over(now_ms) {
            return None;
        }
        until_reset(state.reset_at_epoch_seconds, now_ms)
    }

    /// Snapshot of a pool's quota. A window whose reset time has passed reads
    /// as fully replenished.
    pub fn quota(&self, pool: &str) -> Option<QuotaState> {
        self.quota_at(pool, now_millis())
    }

    pub fn quota_at(&self, pool: &str, now_ms: i64) -> Option<QuotaState> {
        let slot = self.existing_slot(pool)?;
        let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state = guard.clone()?;
        if state.window_over(now_ms) {
            state.remaining = state.limit;
        }
        Some(state)
    }
}
