use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Cancellation signal handed down from the caller. Clones share state:
/// cancelling any clone cancels all of them.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

/// Returned when a suspend point observed cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled; never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone, so `changed` cannot fail here.
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Drive `fut` to completion unless cancellation fires first; the future
    /// is dropped (and any in-flight I/O abandoned) on cancellation.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            out = fut => Ok(out),
        }
    }

    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        self.guard(tokio::time::sleep(duration)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn sleep_completes_without_cancel() {
        let token = CancelToken::new();
        assert_eq!(token.sleep(Duration::from_millis(5)).await, Ok(()));
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_interrupts_long_sleep() {
        let token = CancelToken::new();
        let remote = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.cancel();
        });
        let started = Instant::now();
        assert_eq!(token.sleep(Duration::from_secs(30)).await, Err(Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn already_cancelled_short_circuits() {
        let token = CancelToken::new();
        token.cancel();
        let out = token.guard(async { 1 }).await;
        assert_eq!(out, Err(Cancelled));
    }
}
