//! Connection ramp: staged growth of the pool up to a ceiling

use super::connection::{InvocationBody, VirtualConnection};
use super::pool::ConnectionPool;
use super::state::{StopSignal, TaskRegistry};
use crate::error::error_chain;
use crate::transport::HubConnector;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Ramp parameters, already validated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampPlan {
    pub initial: usize,
    pub max: usize,
    pub step: usize,
    pub step_interval: Duration,
}

impl RampPlan {
    /// Whether another full step fits on top of `current`
    pub fn can_step(&self, current: usize) -> bool {
        self.step > 0 && current.saturating_add(self.step) <= self.max
    }

    /// Pool size the ramp reaches when nothing fails and nothing stops it
    pub fn final_size(&self) -> usize {
        if self.step == 0 || self.initial > self.max {
            return self.initial;
        }
        self.initial + (self.max - self.initial) / self.step * self.step
    }
}

/// What happened to one connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Connected and added to the pool
    Pooled,
    /// Connect failed; logged and dropped
    Failed,
    /// Session stopped before or during connect
    Abandoned,
    /// Connected, but the session stopped or the pool was full
    Discarded,
}

/// Tally of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub pooled: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub discarded: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Pooled => self.pooled += 1,
            AttemptOutcome::Failed => self.failed += 1,
            AttemptOutcome::Abandoned => self.abandoned += 1,
            AttemptOutcome::Discarded => self.discarded += 1,
        }
    }

    pub fn attempts(&self) -> usize {
        self.pooled + self.failed + self.abandoned + self.discarded
    }
}

/// Tally of a whole ramp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RampReport {
    pub batches: usize,
    pub pooled: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub discarded: usize,
}

impl RampReport {
    fn absorb(&mut self, batch: BatchSummary) {
        self.batches += 1;
        self.pooled += batch.pooled;
        self.failed += batch.failed;
        self.abandoned += batch.abandoned;
        self.discarded += batch.discarded;
    }
}

/// Everything a connection attempt needs, shared across attempt tasks
pub struct RampContext {
    pub url: String,
    pub connector: Arc<dyn HubConnector>,
    pub body: Option<InvocationBody>,
    pub messaging_interval: Duration,
    pub stop: StopSignal,
    pub pool: Arc<ConnectionPool>,
    pub tasks: Arc<TaskRegistry>,
}

impl RampContext {
    /// Bring up one connection and, if it is pooled, start its invocation
    /// loop. Never fails: every outcome is reported through the return value.
    pub async fn attempt_connection(&self) -> AttemptOutcome {
        if self.stop.is_stopped() {
            return AttemptOutcome::Abandoned;
        }

        let connected = tokio::select! {
            biased;
            result = self.connector.connect(&self.url) => result,
            _ = self.stop.stopped() => return AttemptOutcome::Abandoned,
        };

        let transport = match connected {
            Ok(transport) => transport,
            Err(e) => {
                error!(
                    "Error in create connection to {}: {}",
                    self.url,
                    error_chain(&e)
                );
                return AttemptOutcome::Failed;
            }
        };

        info!("Connection created: {}", transport.connection_id());

        // A stop may have landed while the handshake was in flight
        if self.stop.is_stopped() {
            debug!(
                "Discarding connection {}: session stopped during connect",
                transport.connection_id()
            );
            return AttemptOutcome::Discarded;
        }

        let connection = Arc::new(VirtualConnection::new(transport, self.stop.clone()));
        if let Err(e) = self.pool.try_insert(connection.clone()) {
            warn!("Discarding connection {}: {}", connection.id(), e);
            return AttemptOutcome::Discarded;
        }

        if let Some(body) = &self.body {
            self.tasks
                .spawn(connection.run(body.clone(), self.messaging_interval));
        }

        AttemptOutcome::Pooled
    }
}

/// Drives pool growth for one session
pub struct RampScheduler {
    ctx: Arc<RampContext>,
}

impl RampScheduler {
    pub fn new(ctx: Arc<RampContext>) -> Self {
        Self { ctx }
    }

    /// Create the initial batch, then add a step batch every
    /// `step_interval` while a full step still fits under the ceiling.
    ///
    /// A stop during the step wait cancels the pending batch immediately.
    pub async fn run(&self, plan: &RampPlan) -> RampReport {
        let mut report = RampReport::default();

        info!("Creating {} initial connections", plan.initial);
        report.absorb(self.create_batch(plan.initial).await);

        while !self.ctx.stop.is_stopped() && plan.can_step(self.ctx.pool.len()) {
            info!("Total connections: {}", self.ctx.pool.len());
            info!(
                "Waiting {:?} before adding more connections",
                plan.step_interval
            );

            if !self.ctx.stop.sleep(plan.step_interval).await {
                info!("Stop requested during ramp wait, pending step dropped");
                break;
            }

            info!("Creating {} step connections", plan.step);
            report.absorb(self.create_batch(plan.step).await);
        }

        info!(
            "Ramp finished: {} connections pooled over {} batches ({} failed, {} abandoned, {} discarded)",
            self.ctx.pool.len(),
            report.batches,
            report.failed,
            report.abandoned,
            report.discarded
        );
        report
    }

    /// Attempt `n` connections concurrently, one task per attempt, and wait
    /// for all of them. Failed attempts do not count toward `n` and are not
    /// retried.
    pub async fn create_batch(&self, n: usize) -> BatchSummary {
        let mut attempts = JoinSet::new();
        for _ in 0..n {
            let ctx = self.ctx.clone();
            attempts.spawn(async move { ctx.attempt_connection().await });
        }

        let mut summary = BatchSummary::default();
        while let Some(result) = attempts.join_next().await {
            match result {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    error!("Connection attempt task failed: {}", e);
                    summary.record(AttemptOutcome::Failed);
                }
            }
        }

        debug!(
            "Batch of {} finished: {} pooled, {} failed, {} abandoned, {} discarded",
            n, summary.pooled, summary.failed, summary.abandoned, summary.discarded
        );
        summary
    }
}
