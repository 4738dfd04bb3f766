//! One-shot deferred tasks.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

pub type DeferredTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Runs a task once after a delay. At most one task is pending at a time.
pub trait DelayedTaskScheduler: Send + Sync {
    /// Returns `false` (and drops `task`) when a task is already pending.
    fn schedule_once(&self, delay: Duration, task: DeferredTask) -> bool;

    fn is_pending(&self) -> bool;

    fn cancel(&self);
}

#[derive(Default)]
pub struct TokioScheduler {
    pending: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DelayedTaskScheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, task: DeferredTask) -> bool {
        if self
            .pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Deferred task already pending");
            return false;
        }

        let pending = self.pending.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.store(false, Ordering::SeqCst);
            task.await;
        });
        *self.handle.lock() = Some(handle);
        true
    }

    fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
        self.pending.store(false, Ordering::SeqCst);
    }
}
