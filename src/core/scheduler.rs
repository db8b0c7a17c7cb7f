//! Fire-and-forget background work
//!
//! Follow-up work triggered by webhooks (decline fee verification, success
//! fee collection, notifications) runs detached from the event that caused
//! it. Every task is tracked so callers can wait for quiescence, and every
//! failure is caught and logged: an error or a panic inside a task never
//! reaches the host process.
//!
//! Delayed tasks are abandoned (not run) when the scheduler shuts down.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::types::EngineError;

/// Tracked, exception-safe task spawner
#[derive(Debug, Clone, Default)]
pub struct TaskScheduler {
    tracker: TaskTracker,
    shutdown: CancellationToken,
    failures: Arc<AtomicUsize>,
    abandoned: Arc<AtomicUsize>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` in the background now
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), EngineError>> + Send + 'static,
    {
        let failures = Arc::clone(&self.failures);
        self.tracker.spawn(run_guarded(name, task, failures));
    }

    /// Run `task` in the background once `delay` has elapsed
    ///
    /// The task is dropped without running if the scheduler shuts down first.
    pub fn spawn_after<F>(&self, name: &'static str, delay: Duration, task: F)
    where
        F: Future<Output = Result<(), EngineError>> + Send + 'static,
    {
        let failures = Arc::clone(&self.failures);
        let abandoned = Arc::clone(&self.abandoned);
        let shutdown = self.shutdown.clone();

        self.tracker.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => run_guarded(name, task, failures).await,
                _ = shutdown.cancelled() => {
                    abandoned.fetch_add(1, Ordering::Relaxed);
                    info!(task = name, "Delayed task abandoned on shutdown");
                }
            }
        });
    }

    /// Wait until every task spawned so far (and any they spawn) has finished
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Abandon delayed tasks and wait for running ones to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!(
            failures = self.failures(),
            abandoned = self.abandoned(),
            "Task scheduler stopped"
        );
    }

    /// Tasks that have not finished yet
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Tasks that returned an error or panicked
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    /// Delayed tasks dropped by shutdown
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::Relaxed)
    }
}

async fn run_guarded<F>(name: &'static str, task: F, failures: Arc<AtomicUsize>)
where
    F: Future<Output = Result<(), EngineError>> + Send + 'static,
{
    match AssertUnwindSafe(task).catch_unwind().await {
        Ok(Ok(())) => debug!(task = name, "Background task completed"),
        Ok(Err(e)) => {
            failures.fetch_add(1, Ordering::Relaxed);
            error!(task = name, error = %e, "Background task failed");
        }
        Err(panic) => {
            failures.fetch_add(1, Ordering::Relaxed);
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(task = name, panic = %message, "Background task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn test_errors_and_panics_are_contained() {
        let scheduler = TaskScheduler::new();

        scheduler.spawn("ok", async { Ok(()) });
        scheduler.spawn("fails", async { Err(EngineError::webhook("boom")) });
        scheduler.spawn("panics", async {
            if true {
                panic!("task exploded");
            }
            Ok(())
        });

        scheduler.wait_idle().await;
        assert_eq!(scheduler.failures(), 2);
        assert_eq!(scheduler.pending(), 0);

        // Still usable after waiting
        scheduler.spawn("after", async { Ok(()) });
        scheduler.wait_idle().await;
        assert_eq!(scheduler.failures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_after_waits_for_delay() {
        let scheduler = TaskScheduler::new();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        scheduler.spawn_after("delayed", Duration::from_secs(30), async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(!ran.load(Ordering::SeqCst));

        scheduler.wait_idle().await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_delayed_tasks() {
        let scheduler = TaskScheduler::new();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        scheduler.spawn_after("delayed", Duration::from_secs(30), async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        scheduler.shutdown().await;
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(scheduler.abandoned(), 1);
    }
}
