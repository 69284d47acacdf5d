//! Load session lifecycle
//!
//! Holds the target, the stop signal, the pool and the task registry, and
//! exposes start/stop plus a duration-bounded run.

use super::connection::InvocationBody;
use super::pool::ConnectionPool;
use super::ramp::{RampContext, RampReport, RampScheduler};
use super::state::{StopSignal, TaskRegistry};
use crate::config::{ConfigError, LoadPlan, LoadProfile};
use crate::transport::HubConnector;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid load configuration")]
    Config(#[from] ConfigError),

    #[error("session has already been started")]
    AlreadyStarted,

    #[error("session has no target; call configure first")]
    NotConfigured,
}

struct Target {
    url: String,
    body: Option<InvocationBody>,
}

/// Top-level coordinator of one load run
pub struct LoadSession {
    connector: Arc<dyn HubConnector>,
    target: Option<Target>,
    stop: StopSignal,
    pool: Arc<ConnectionPool>,
    tasks: Arc<TaskRegistry>,
    started: AtomicBool,
    report: Arc<OnceLock<RampReport>>,
}

impl LoadSession {
    pub fn new(connector: Arc<dyn HubConnector>) -> Self {
        Self {
            connector,
            target: None,
            stop: StopSignal::new(),
            pool: Arc::new(ConnectionPool::new()),
            tasks: Arc::new(TaskRegistry::new()),
            started: AtomicBool::new(false),
            report: Arc::new(OnceLock::new()),
        }
    }

    /// Set the hub URL and the body each connection invokes. Without a
    /// body, pooled connections stay idle.
    pub fn configure(
        &mut self,
        url: impl Into<String>,
        body: Option<InvocationBody>,
    ) -> Result<(), SessionError> {
        if self.started.load(Ordering::SeqCst) {
            return Err(SessionError::AlreadyStarted);
        }
        let url = url.into();
        if url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl.into());
        }
        self.target = Some(Target { url, body });
        Ok(())
    }

    /// Validate the profile and start the ramp in the background. Returns
    /// without waiting for any connection.
    pub fn start(&self, profile: &LoadProfile) -> Result<LoadPlan, SessionError> {
        let target = self.target.as_ref().ok_or(SessionError::NotConfigured)?;
        let plan = profile.validate()?;

        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyStarted);
        }

        info!(
            "Starting load session against {}: {} initial, {} max, {} per step every {:?}",
            target.url, plan.ramp.initial, plan.ramp.max, plan.ramp.step, plan.ramp.step_interval
        );

        self.pool.set_limit(plan.ramp.max);

        let ctx = Arc::new(RampContext {
            url: target.url.clone(),
            connector: self.connector.clone(),
            body: target.body.clone(),
            messaging_interval: plan.messaging_interval,
            stop: self.stop.clone(),
            pool: self.pool.clone(),
            tasks: self.tasks.clone(),
        });
        let scheduler = RampScheduler::new(ctx);
        let report = self.report.clone();
        let ramp = plan.ramp;
        self.tasks.spawn(async move {
            let _ = report.set(scheduler.run(&ramp).await);
        });

        Ok(plan)
    }

    /// [`start`](Self::start), then stop automatically once the profile's
    /// duration has elapsed
    pub fn run_for(&self, profile: &LoadProfile) -> Result<LoadPlan, SessionError> {
        let plan = self.start(profile)?;

        let stop = self.stop.clone();
        let duration = plan.duration;
        self.tasks.spawn(async move {
            if stop.sleep(duration).await && stop.stop() {
                info!("Run duration of {:?} elapsed, stopping", duration);
            }
        });

        Ok(plan)
    }

    /// Raise the stop flag. Returns `true` only for the call that raised it;
    /// later calls are no-ops.
    pub fn stop(&self) -> bool {
        let first = self.stop.stop();
        if first {
            info!(
                "Stopping load session with {} connections",
                self.pool.len()
            );
        }
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Resolves once the session is stopped, by any means
    pub async fn stopped(&self) {
        self.stop.stopped().await
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Ramp tally, available once the scheduler has finished
    pub fn ramp_report(&self) -> Option<RampReport> {
        self.report.get().copied()
    }

    /// Wait for every task the session spawned: the scheduler, connection
    /// attempts, invocation loops and the duration timer
    pub async fn wait_for_quiescence(&self) {
        self.tasks.wait_idle().await;
    }
}

impl Drop for LoadSession {
    fn drop(&mut self) {
        // Lets background tasks wind down instead of running unobserved
        self.stop.stop();
    }
}
