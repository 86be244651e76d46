use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// A one-shot timer slot that holds at most one pending callback.
///
/// Arming always cancels whatever was pending. Once the delay elapses the
/// callback is spawned as its own task, so a callback may re-arm or cancel
/// the very timer that fired it without aborting itself.
pub struct CancellableTimer {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl CancellableTimer {
    pub fn new(name: &'static str) -> Self {
        Self { name, handle: None }
    }

    pub fn arm<F>(&mut self, delay: Duration, callback: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let name = self.name;
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(timer = name, "Timer fired");
            tokio::spawn(callback);
        }));
    }

    /// Cancel the pending callback. Returns true if one was still waiting.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                if pending {
                    debug!(timer = self.name, "Timer cancelled");
                }
                pending
            }
            None => false,
        }
    }

    /// Whether a callback is still waiting for its delay to elapse.
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for CancellableTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::auth::testing::settle;

    fn counting(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = CancellableTimer::new("test");

        timer.arm(Duration::from_secs(60), counting(&fired));
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_secs(59)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending_callback() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut timer = CancellableTimer::new("test");

        timer.arm(Duration::from_secs(10), counting(&first));
        timer.arm(Duration::from_secs(20), counting(&second));

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = CancellableTimer::new("test");

        timer.arm(Duration::from_secs(10), counting(&fired));
        assert!(timer.cancel());
        assert!(!timer.cancel());

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
