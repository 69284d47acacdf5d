//! hubload library
//!
//! Opens many concurrent connections to a hub endpoint, ramps their count up
//! in steps, and drives periodic or one-shot hub invocations on each of them
//! until the session is stopped.

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use config::{Config, ConfigError, LoadProfile};
pub use session::manager::{LoadSession, SessionError};
pub use session::script::InvocationScript;
pub use transport::{ConnectionState, HubConnection, HubConnector, SharedConnection};
