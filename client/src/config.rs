//! Load generator configuration
//!
//! Configuration is loaded from `HUBLOAD_*` environment variables, falling
//! back to defaults for anything unset. Counts and durations are read as
//! signed integers so that negative values are reported, not silently
//! wrapped.

use crate::session::ramp::RampPlan;
use crate::session::script::InvocationScript;
use crate::transport::websocket::WebSocketOptions;
use std::env;
use std::num::NonZeroUsize;
use std::time::Duration;
use thiserror::Error;

/// Invalid configuration, reported at startup
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must not be negative (got {value})")]
    Negative { name: &'static str, value: i64 },

    #[error("{var}={value:?} is not a valid {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("max clients ({max}) must not be below start clients ({initial})")]
    CeilingBelowInitial { initial: i64, max: i64 },

    #[error("hub url must not be empty")]
    EmptyUrl,

    #[error("worker thread count must be at least 1")]
    NoWorkers,
}

/// The six numbers that shape a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadProfile {
    /// Connections created in the first batch
    pub initial_clients: i64,
    /// Ceiling on pooled connections
    pub max_clients: i64,
    /// Connections added per step; 0 disables ramping
    pub step_clients: i64,
    /// Wait between step batches
    pub step_interval_secs: i64,
    /// Wait between invocations on one connection; 0 invokes once
    pub messaging_interval_secs: i64,
    /// Wall-clock budget of a timed run
    pub duration_secs: i64,
}

/// A validated [`LoadProfile`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadPlan {
    pub ramp: RampPlan,
    pub messaging_interval: Duration,
    pub duration: Duration,
}

impl Default for LoadProfile {
    fn default() -> Self {
        Self {
            initial_clients: 50,
            max_clients: 500,
            step_clients: 10,
            step_interval_secs: 2,
            messaging_interval_secs: 10,
            duration_secs: 600,
        }
    }
}

impl LoadProfile {
    /// Check every value and convert to typed units
    pub fn validate(&self) -> Result<LoadPlan, ConfigError> {
        let initial = non_negative("start clients", self.initial_clients)?;
        let max = non_negative("max clients", self.max_clients)?;
        let step = non_negative("step clients", self.step_clients)?;
        let step_interval = non_negative("step interval", self.step_interval_secs)?;
        let messaging_interval = non_negative("message interval", self.messaging_interval_secs)?;
        let duration = non_negative("duration", self.duration_secs)?;

        if max < initial {
            return Err(ConfigError::CeilingBelowInitial {
                initial: self.initial_clients,
                max: self.max_clients,
            });
        }

        Ok(LoadPlan {
            ramp: RampPlan {
                initial: initial as usize,
                max: max as usize,
                step: step as usize,
                step_interval: Duration::from_secs(step_interval),
            },
            messaging_interval: Duration::from_secs(messaging_interval),
            duration: Duration::from_secs(duration),
        })
    }
}

fn non_negative(name: &'static str, value: i64) -> Result<u64, ConfigError> {
    u64::try_from(value).map_err(|_| ConfigError::Negative { name, value })
}

/// Main configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Hub URL
    pub url: String,

    /// Ramp and timing
    pub profile: LoadProfile,

    /// Methods invoked on every tick
    pub script: InvocationScript,

    /// Transport tuning
    pub transport: WebSocketOptions,

    /// Runtime worker threads
    pub worker_threads: usize,

    /// How long to wait for tasks to wind down after stop
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000/hubs".to_string(),
            profile: LoadProfile::default(),
            script: InvocationScript::default(),
            transport: WebSocketOptions::default(),
            worker_threads: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let int = |var: &'static str| -> Result<Option<i64>, ConfigError> {
            match lookup(var) {
                Some(raw) => raw
                    .trim()
                    .parse::<i64>()
                    .map(Some)
                    .map_err(|_| ConfigError::Invalid {
                        var,
                        value: raw,
                        expected: "integer",
                    }),
                None => Ok(None),
            }
        };

        // Hub
        if let Some(url) = lookup("HUBLOAD_URL") {
            config.url = url.trim().to_string();
        }
        if config.url.is_empty() {
            return Err(ConfigError::EmptyUrl);
        }

        // Ramp and timing
        if let Some(v) = int("HUBLOAD_START_CLIENTS")? {
            config.profile.initial_clients = v;
        }
        if let Some(v) = int("HUBLOAD_MAX_CLIENTS")? {
            config.profile.max_clients = v;
        }
        if let Some(v) = int("HUBLOAD_STEP_CLIENTS")? {
            config.profile.step_clients = v;
        }
        if let Some(v) = int("HUBLOAD_STEP_SECS")? {
            config.profile.step_interval_secs = v;
        }
        if let Some(v) = int("HUBLOAD_MESSAGE_INTERVAL_SECS")? {
            config.profile.messaging_interval_secs = v;
        }
        if let Some(v) = int("HUBLOAD_DURATION_SECS")? {
            config.profile.duration_secs = v;
        }
        config.profile.validate()?;

        // Invocation script
        if let Some(methods) = lookup("HUBLOAD_METHODS") {
            config.script = InvocationScript::parse(&methods, config.script.pause);
        }
        if let Some(ms) = int("HUBLOAD_METHOD_PAUSE_MS")? {
            config.script.pause = Duration::from_millis(non_negative("method pause", ms)?);
        }

        // Transport
        if let Some(val) = lookup("HUBLOAD_SKIP_NEGOTIATION") {
            config.transport.skip_negotiation = val.to_lowercase() == "true" || val == "1";
        }
        if let Some(secs) = int("HUBLOAD_CONNECT_TIMEOUT_SECS")? {
            config.transport.connect_timeout =
                Duration::from_secs(non_negative("connect timeout", secs)?);
        }

        // Runtime
        if let Some(threads) = int("HUBLOAD_WORKER_THREADS")? {
            let threads = non_negative("worker threads", threads)?;
            if threads == 0 {
                return Err(ConfigError::NoWorkers);
            }
            config.worker_threads = threads as usize;
        }
        if let Some(secs) = int("HUBLOAD_SHUTDOWN_GRACE_SECS")? {
            config.shutdown_grace = Duration::from_secs(non_negative("shutdown grace", secs)?);
        }

        Ok(config)
    }
}
