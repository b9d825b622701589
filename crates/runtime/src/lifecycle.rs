//! Per-session task tracking and cancellation
//!
//! Every long-running loop belonging to a session is spawned through its
//! LifecycleManager. `stop` flips the stop signal, aborts whatever is still
//! running, and awaits completion, so teardown never leaks tasks.

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::RuntimeError;

struct TrackedTask {
    name: String,
    handle: JoinHandle<()>,
}

/// Per-session cancellation signal and task set
pub struct LifecycleManager {
    session_id: String,
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<TrackedTask>>,
}

impl LifecycleManager {
    pub fn new(session_id: impl Into<String>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            session_id: session_id.into(),
            stop_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        !self.is_stopped()
    }

    /// Receiver cooperative loops select on to exit early
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Spawn a tracked task; fails once the session is stopped
    pub fn spawn<F>(&self, name: impl Into<String>, future: F) -> Result<(), RuntimeError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.is_stopped() {
            return Err(RuntimeError::Stopped(self.session_id.clone()));
        }
        let name = name.into();
        let handle = tokio::spawn(future);

        let mut tasks = self.tasks.lock();
        // Opportunistically drop handles of tasks that already finished.
        tasks.retain(|t| !t.handle.is_finished());
        tasks.push(TrackedTask { name, handle });
        Ok(())
    }

    /// Number of tasks still tracked (finished ones are pruned lazily)
    pub fn task_count(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.handle.is_finished());
        tasks.len()
    }

    /// Set the stop signal, cancel every tracked task, await completion
    ///
    /// Idempotent: a second call finds the signal set and no tasks left.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let tasks: Vec<TrackedTask> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.handle.abort();
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(
                        session_id = %self.session_id,
                        task = %task.name,
                        error = %e,
                        "tracked task ended abnormally"
                    );
                }
            }
        }
        tracing::debug!(session_id = %self.session_id, "lifecycle stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_cancels_tracked_tasks() {
        let lifecycle = LifecycleManager::new("s1");
        let finished = Arc::new(AtomicBool::new(false));
        let finished2 = finished.clone();

        lifecycle
            .spawn("sleeper", async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                finished2.store(true, Ordering::SeqCst);
            })
            .unwrap();

        assert!(lifecycle.is_running());
        lifecycle.stop().await;
        assert!(lifecycle.is_stopped());
        // Aborted, so the tail of the task never ran.
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_spawn_after_stop_fails() {
        let lifecycle = LifecycleManager::new("s1");
        lifecycle.stop().await;
        let result = lifecycle.spawn("late", async {});
        assert!(matches!(result, Err(RuntimeError::Stopped(_))));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let lifecycle = LifecycleManager::new("s1");
        lifecycle
            .spawn("sleeper", async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            })
            .unwrap();
        lifecycle.stop().await;
        lifecycle.stop().await;
        assert_eq!(lifecycle.task_count(), 0);
    }

    #[tokio::test]
    async fn test_cooperative_exit_via_stop_signal() {
        let lifecycle = LifecycleManager::new("s1");
        let exited_cleanly = Arc::new(AtomicBool::new(false));
        let exited2 = exited_cleanly.clone();
        let mut signal = lifecycle.stop_signal();

        lifecycle
            .spawn("loop", async move {
                loop {
                    tokio::select! {
                        _ = signal.changed() => {
                            if *signal.borrow() {
                                exited2.store(true, Ordering::SeqCst);
                                break;
                            }
                        }
                        _ = tokio::time::sleep(Duration::from_millis(5)) => {}
                    }
                }
            })
            .unwrap();

        // Give the loop a chance to observe the signal before abort lands.
        let _ = lifecycle.stop_tx.send(true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        lifecycle.stop().await;
        assert!(exited_cleanly.load(Ordering::SeqCst));
    }
}
