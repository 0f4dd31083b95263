//! Supervision of long-lived background tasks.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

/// Owns the cancellation scope and the set of background tasks for one process.
///
/// Every task runs on its own; a panic in one is logged and leaves the others
/// running.
#[derive(Clone, Debug, Default)]
pub struct Supervisor {
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl Supervisor {
    /// Creates a new supervisor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// The token cancelled on shutdown.
    #[must_use]
    pub const fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown_token
    }

    /// Spawns a supervised task.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);

        self.task_tracker.spawn(async move {
            match handle.await {
                Ok(()) => debug!("task {} exited", name),
                Err(e) if e.is_panic() => error!("task {} panicked: {}", name, e),
                Err(e) => warn!("task {} did not complete: {}", name, e),
            }
        });
    }

    /// Cancels every task and waits for all of them to exit.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_panicking_task_does_not_stop_others() {
        let supervisor = Supervisor::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        supervisor.spawn("panics", async {
            panic!("boom");
        });

        let counter = ticks.clone();
        let token = supervisor.shutdown_token().clone();
        supervisor.spawn("ticks", async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(Duration::from_millis(5)) => {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let before = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(ticks.load(Ordering::SeqCst) > before);

        supervisor.shutdown().await;
        assert!(supervisor.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_tasks() {
        let supervisor = Supervisor::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let done = finished.clone();
        let token = supervisor.shutdown_token().clone();
        supervisor.spawn("waits", async move {
            token.cancelled().await;
            done.fetch_add(1, Ordering::SeqCst);
        });

        supervisor.shutdown().await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
