use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Quiet period before a suggestion request goes out.
pub const SUGGESTION_DEBOUNCE: Duration = Duration::from_millis(300);

/// Coalesces bursts of calls: each call waits out the window and only runs if
/// no newer call arrived meanwhile. Superseded calls resolve to `None` without
/// running. Requests already in flight are not aborted.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    generation: Arc<AtomicU64>,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(SUGGESTION_DEBOUNCE)
    }
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn run<F, Fut, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let ticket = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tokio::time::sleep(self.window).await;
        if self.generation.load(Ordering::Acquire) != ticket {
            return None;
        }
        Some(f().await)
    }
}
