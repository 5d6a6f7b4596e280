//! Trailing-edge debounce timer.

use std::time::Duration;
use tokio::task::JoinHandle;

/// Runs an action once a burst of triggers has been quiet for `delay`.
///
/// Every [`trigger`](Debouncer::trigger) replaces the pending action and
/// restarts the delay. Dropping or cancelling the debouncer aborts the
/// pending timer, so a cancelled action never runs.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    timer: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, timer: None }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn trigger<F>(&mut self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        let delay = self.delay;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.timer.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
