//! Periodic-task scheduler.
//!
//! Drives registered tasks at a fixed cadence on a dedicated tokio task and
//! honours a prompt shutdown signal. Tasks gate their own work (the
//! refresher skips ticks until its next scheduled refresh time), so the
//! cadence here is deliberately coarse.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A task driven by the periodic scheduler.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    /// The task's name, for logs.
    fn name(&self) -> &str;

    /// One tick of work. Runs on the scheduler's task; long blocking work
    /// belongs elsewhere.
    async fn do_work(&self);
}

/// Runs one periodic task until shutdown.
#[derive(Debug)]
pub struct PeriodicRunner {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl PeriodicRunner {
    /// Spawns the scheduler loop for `task` with the given period.
    #[must_use]
    pub fn spawn(task: Arc<dyn PeriodicTask>, period: Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let shutdown_signal = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(task = task.name(), period_secs = period.as_secs(), "periodic task started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!(task = task.name(), "periodic task tick");
                        task.do_work().await;
                    }
                    () = shutdown_signal.notified() => {
                        info!(task = task.name(), "periodic task stopped");
                        break;
                    }
                }
            }
        });

        Self { shutdown, handle }
    }

    /// Signals shutdown and waits for the loop to exit.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingTask {
        ticks: AtomicU32,
    }

    #[async_trait]
    impl PeriodicTask for CountingTask {
        fn name(&self) -> &str {
            "counting-task"
        }

        async fn do_work(&self) {
            self.ticks.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn test_runner_ticks_and_stops() {
        let task = Arc::new(CountingTask {
            ticks: AtomicU32::new(0),
        });
        let runner = PeriodicRunner::spawn(
            Arc::clone(&task) as Arc<dyn PeriodicTask>,
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        runner.shutdown().await;

        let ticks = task.ticks.load(Ordering::Relaxed);
        assert!(ticks >= 2, "expected at least two ticks, saw {ticks}");

        // No further ticks after shutdown.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(task.ticks.load(Ordering::Relaxed), ticks);
    }
}
