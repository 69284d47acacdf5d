//! Shared run state: the stop signal and the task registry

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Cooperative stop flag shared by the scheduler, every connection attempt
/// and every invocation loop.
///
/// Monotonic: once stopped it never resets. Check points read it with
/// [`is_stopped`](Self::is_stopped); waits race it through
/// [`sleep`](Self::sleep) so a stop wakes them immediately.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
    flipped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `true` only for the call that raised it.
    pub fn stop(&self) -> bool {
        let first = !self.flipped.swap(true, Ordering::SeqCst);
        self.token.cancel();
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the flag is raised
    pub async fn stopped(&self) {
        self.token.cancelled().await;
    }

    /// Sleep for `duration` unless stopped first. Returns `true` when the
    /// full duration elapsed without a stop.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(duration) => !self.is_stopped(),
        }
    }
}

/// Registry of every task spawned for a session, so shutdown can wait for
/// them instead of abandoning them at process exit.
///
/// Dropping the registry aborts whatever is still running.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<JoinSet<()>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn a task on the current runtime and keep its handle
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.lock();
        // Reap finished tasks so long runs do not accumulate handles
        while let Some(result) = tasks.try_join_next() {
            report_join(result);
        }
        tasks.spawn(task);
    }

    /// Number of tracked tasks, finished ones included until reaped
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Wait until every tracked task, including ones spawned while waiting,
    /// has finished.
    pub async fn wait_idle(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                return;
            }
            while let Some(result) = batch.join_next().await {
                report_join(result);
            }
        }
    }
}

fn report_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("Session task panicked: {}", e);
        } else {
            warn!("Session task cancelled: {}", e);
        }
    }
}
