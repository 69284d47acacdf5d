//! Load session: connection ramp, pool and per-connection invocation loops
//!
//! A [`LoadSession`](manager::LoadSession) owns the stop signal, the pool and
//! the task registry. Its [`RampScheduler`](ramp::RampScheduler) fills the
//! pool in batches, and each pooled [`VirtualConnection`] runs its own
//! invocation loop until the stop signal is raised.

pub mod connection;
pub mod manager;
pub mod pool;
pub mod ramp;
pub mod script;
pub mod state;

pub use connection::{InvocationBody, InvocationCounts, TickOutcome, VirtualConnection, invocation_body};
pub use manager::{LoadSession, SessionError};
pub use pool::{ConnectionPool, PoolFull};
pub use ramp::{AttemptOutcome, BatchSummary, RampPlan, RampReport, RampScheduler};
pub use script::InvocationScript;
pub use state::{StopSignal, TaskRegistry};
