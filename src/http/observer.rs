use std::time::Duration;

use super::classify::ErrorKind;

/// A retry the executor is about to wait for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEvent {
    pub path: String,
    pub kind: ErrorKind,
    pub attempt: u32,
    pub delay: Duration,
}

/// Optional progress hooks. Purely informational: nothing the executor or
/// paginator decides depends on whether an observer is installed.
pub trait Observer: Send + Sync {
    fn on_attempt(&self, _path: &str, _attempt: u32) {}
    fn on_retry(&self, _event: &RetryEvent) {}
    fn on_rate_limit_wait(&self, _pool: &str, _wait: Duration) {}
    fn on_page(&self, _page: u32, _items: usize) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}
