//! Stoppable periodic background tasks.
//!
//! Caches and the file router expire entries lazily on read, and a
//! [`SweepHandle`] removes the rest on a fixed interval. The task only
//! holds a [`Weak`] reference to its target, so it never keeps a cache
//! alive, and it exits at the next tick after [`SweepHandle::stop`] (or
//! after the handle is dropped).

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a running sweep task.
#[derive(Debug)]
pub struct SweepHandle {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SweepHandle {
    /// Run `sweep(&target)` every `interval` until stopped or until the
    /// target has been dropped. The first run happens one full interval
    /// after spawning.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<T, F>(name: &'static str, interval: Duration, target: &Arc<T>, sweep: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T) + Send + 'static,
    {
        let weak: Weak<T> = Arc::downgrade(target);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let period = interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(target) = weak.upgrade() else { break };
                        sweep(&target);
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(sweep = name, "background sweep stopped");
        });

        tracing::debug!(sweep = name, ?period, "background sweep started");
        Self {
            name,
            stop_tx,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the task to stop. Safe to call any number of times.
    pub fn stop(&self) {
        // Fails only when the task already exited.
        let _ = self.stop_tx.send(true);
    }

    /// Signal the task and wait for it to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(sweep = self.name, error = %e, "background sweep panicked");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, |t| t.is_finished())
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
