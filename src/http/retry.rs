use std::time::Duration;

use super::classify::ErrorKind;

/// Rate-limit waits shorter than this are rounded up, so a reset time that
/// has already passed cannot turn into a tight retry loop.
pub const MIN_RATE_LIMIT_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Stop,
    RetryAfter(Duration),
}

/// Book-keeping for one logical call's retry loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryContext {
    /// Attempts sent so far, including the first.
    pub attempt: u32,
    pub elapsed: Duration,
    pub last_kind: Option<ErrorKind>,
    /// Time already spent suspended on rate limits.
    pub rate_limit_waited: Duration,
}

impl RetryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self, kind: ErrorKind, elapsed: Duration) {
        self.last_kind = Some(kind);
        self.elapsed = elapsed;
    }

    pub fn record_rate_limit_wait(&mut self, waited: Duration) {
        self.rate_limit_waited += waited;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts (first one included) for backoff-driven kinds.
    pub max_attempts: u32,
    pub base: Duration,
    /// Clamp for a single rate-limit wait and for the total rate-limit
    /// waiting of one logical call.
    pub max_rate_limit_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_millis(500),
            max_rate_limit_wait: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Decide what follows the failed attempt described by `ctx`.
    /// `rate_limit_wait` is the exact wait the server told us about, if any.
    pub fn next_action(
        &self,
        kind: ErrorKind,
        ctx: &RetryContext,
        rate_limit_wait: Option<Duration>,
    ) -> RetryAction {
        match kind {
            ErrorKind::RateLimited => match rate_limit_wait {
                Some(wait) => {
                    if ctx.rate_limit_waited >= self.max_rate_limit_wait {
                        return RetryAction::Stop;
                    }
                    RetryAction::RetryAfter(self.clamp_rate_limit_wait(wait))
                }
                None => self.backoff_or_stop(ctx),
            },
            ErrorKind::NetworkError | ErrorKind::Timeout | ErrorKind::ServerError => {
                self.backoff_or_stop(ctx)
            }
            ErrorKind::Auth | ErrorKind::NotFound | ErrorKind::Validation | ErrorKind::Unknown => {
                RetryAction::Stop
            }
        }
    }

    pub fn clamp_rate_limit_wait(&self, wait: Duration) -> Duration {
        wait.max(MIN_RATE_LIMIT_WAIT).min(self.max_rate_limit_wait)
    }

    fn backoff_or_stop(&self, ctx: &RetryContext) -> RetryAction {
        if ctx.attempt == 0 || ctx.attempt >= self.max_attempts {
            return RetryAction::Stop;
        }
        RetryAction::RetryAfter(self.backoff(ctx.attempt))
    }

    /// Delay before the `retry`-th retry (1-based):
    /// `base * 2^(retry-1)` plus jitter in `[0, base)`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let base_ms = self.base.as_millis().min(u64::MAX as u128) as u64;
        let exp = retry.saturating_sub(1).min(32);
        let delay = base_ms.saturating_mul(1u64 << exp);
        let jitter = if base_ms > 0 {
            fastrand::u64(0..base_ms)
        } else {
            0
        };
        Duration::from_millis(delay.saturating_add(jitter))
    }
}
