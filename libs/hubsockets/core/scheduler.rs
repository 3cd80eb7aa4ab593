//! Tokio-backed [`Scheduler`]
//!
//! # Architecture
//!
//! Each periodic job runs in its own Tokio task:
//!
//! ```text
//! ┌─────────────────────┐
//! │  Periodic Task      │
//! │  (Tokio spawn)      │
//! │                     │
//! │  Every interval:    │
//! │  1. Wait for tick   │
//! │  2. Check shutdown  │ <── bounded(1) crossbeam channel from cancel()
//! │  3. Run job         │
//! └─────────────────────┘
//! ```
//!
//! Jobs are expected to be short and non-blocking: they only start promises.

use crate::traits::{HubSocketError, Result, ScheduledTask, Scheduler};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default scheduler running jobs on a Tokio runtime
#[derive(Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Scheduler on the runtime of the calling context
    pub fn current() -> Result<Self> {
        Handle::try_current().map(Self::new).map_err(|e| {
            HubSocketError::Configuration(format!("no Tokio runtime available: {}", e))
        })
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(
        &self,
        interval: Duration,
        task: Arc<dyn Fn() + Send + Sync>,
    ) -> Arc<dyn ScheduledTask> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let handle = self
            .runtime
            .spawn(periodic_task(interval, task, shutdown_rx));

        Arc::new(TokioTask {
            shutdown_tx,
            cancelled: AtomicBool::new(false),
            handle,
        })
    }

    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        self.runtime.spawn(async move { task() });
    }
}

struct TokioTask {
    shutdown_tx: Sender<()>,
    cancelled: AtomicBool,
    handle: JoinHandle<()>,
}

impl ScheduledTask for TokioTask {
    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            let _ = self.shutdown_tx.try_send(());
            self.handle.abort();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

async fn periodic_task(
    interval: Duration,
    task: Arc<dyn Fn() + Send + Sync>,
    shutdown_rx: Receiver<()>,
) {
    // tokio::time::interval panics on a zero period
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    // Skip the first immediate tick - wait for the first interval
    ticker.tick().await;
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    debug!("Periodic task started with interval: {:?}", interval);

    loop {
        ticker.tick().await;

        match shutdown_rx.try_recv() {
            Ok(_) | Err(crossbeam_channel::TryRecvError::Disconnected) => {
                debug!("Periodic task received shutdown signal");
                break;
            }
            Err(crossbeam_channel::TryRecvError::Empty) => {}
        }

        task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_periodic_task_runs_until_cancelled() {
        let scheduler = TokioScheduler::current().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = Arc::clone(&runs);

        let handle = scheduler.schedule(
            Duration::from_millis(10),
            Arc::new(move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_millis(65)).await;
        handle.cancel();
        assert!(handle.is_cancelled());
        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several runs, got {}", seen);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(runs.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_first_run_waits_one_interval() {
        let scheduler = TokioScheduler::current().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = Arc::clone(&runs);

        let handle = scheduler.schedule(
            Duration::from_millis(200),
            Arc::new(move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        handle.cancel();
    }

    #[tokio::test]
    async fn test_execute_runs_once() {
        let scheduler = TokioScheduler::current().unwrap();
        let (tx, rx) = futures::channel::oneshot::channel();
        scheduler.execute(Box::new(move || {
            let _ = tx.send(7);
        }));
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[test]
    fn test_current_without_runtime_fails() {
        assert!(matches!(
            TokioScheduler::current(),
            Err(HubSocketError::Configuration(_))
        ));
    }
}
