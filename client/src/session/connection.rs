//! Virtual connection: one simulated client and its invocation loop

use super::state::StopSignal;
use crate::error::error_chain;
use crate::transport::{ConnectionState, InvocationError, SharedConnection};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Caller-supplied procedure run against a connection on every tick. It may
/// perform any number of hub calls.
pub type InvocationBody =
    Arc<dyn Fn(SharedConnection) -> BoxFuture<'static, Result<(), InvocationError>> + Send + Sync>;

/// Wrap an async closure as an [`InvocationBody`]
pub fn invocation_body<F, Fut>(body: F) -> InvocationBody
where
    F: Fn(SharedConnection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), InvocationError>> + Send + 'static,
{
    Arc::new(move |connection| Box::pin(body(connection)))
}

/// Result of one tick of the invocation loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Body ran and returned `Ok`
    Completed,
    /// Body returned an error or panicked
    Failed,
    /// Transport was not connected; body not run
    Skipped,
    /// Session already stopped; body not run
    Stopped,
}

/// Per-connection tick counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvocationCounts {
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// One simulated client. Owns its transport exclusively and observes the
/// session's stop signal.
pub struct VirtualConnection {
    id: String,
    transport: SharedConnection,
    stop: StopSignal,
    counters: Counters,
}

impl VirtualConnection {
    pub fn new(transport: SharedConnection, stop: StopSignal) -> Self {
        Self {
            id: transport.connection_id().to_string(),
            transport,
            stop,
            counters: Counters::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn invocations(&self) -> InvocationCounts {
        InvocationCounts {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    /// Run `body` once if the session is running and the transport is
    /// connected. Errors and panics from the body are logged, never
    /// propagated.
    pub async fn invoke_once(&self, body: &InvocationBody) -> TickOutcome {
        if self.stop.is_stopped() {
            return TickOutcome::Stopped;
        }

        let state = self.transport.state();
        if state != ConnectionState::Connected {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Skipping invocation on connection {} (state {:?})",
                self.id, state
            );
            return TickOutcome::Skipped;
        }

        match AssertUnwindSafe(body(self.transport.clone()))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                TickOutcome::Completed
            }
            Ok(Err(e)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Invocation failed on connection {}: {}",
                    self.id,
                    error_chain(&e)
                );
                TickOutcome::Failed
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!("Invocation panicked on connection {}", self.id);
                TickOutcome::Failed
            }
        }
    }

    /// Invoke `body` every `interval` until the session stops. A stop during
    /// the wait ends the loop without another tick.
    pub async fn invoke_repeating(&self, body: &InvocationBody, interval: Duration) {
        while !self.stop.is_stopped() {
            self.invoke_once(body).await;

            debug!(
                "Waiting {:?} before invoking again on connection {}",
                interval, self.id
            );
            if !self.stop.sleep(interval).await {
                break;
            }
        }

        let counts = self.invocations();
        debug!(
            "Invocation loop on connection {} finished: {} completed, {} failed, {} skipped",
            self.id, counts.completed, counts.failed, counts.skipped
        );
    }

    /// Entry point for the per-connection task. A zero interval means a
    /// single invocation for the whole run.
    pub async fn run(self: Arc<Self>, body: InvocationBody, interval: Duration) {
        if interval.is_zero() {
            self.invoke_once(&body).await;
        } else {
            self.invoke_repeating(&body, interval).await;
        }
    }
}
