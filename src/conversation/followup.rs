//! One-shot delayed callbacks for post-suggestion check-ins.
//!
//! Nothing is persisted: a pending check-in is lost if the process exits
//! before it fires.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Spawns a single deferred task per request.
#[derive(Debug, Clone, Default)]
pub struct FollowUpScheduler;

impl FollowUpScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Run `task` once after `delay`.
    pub fn schedule<T>(&self, delay: Duration, task: T) -> JoinHandle<()>
    where
        T: Future<Output = ()> + Send + 'static,
    {
        debug!(delay_ms = delay.as_millis() as u64, "Follow-up scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_task_runs_once_after_delay() {
        let scheduler = FollowUpScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        let handle = scheduler.schedule(Duration::from_millis(200), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        handle.await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_aborted_follow_up_never_fires() {
        let scheduler = FollowUpScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        let handle = scheduler.schedule(Duration::from_secs(900), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
