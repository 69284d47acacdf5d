//! Transport boundary
//!
//! The load session only needs three things from a connection: connect,
//! invoke a named hub method, and report its state. [`HubConnector`] and
//! [`HubConnection`] capture that; [`websocket`] is the shipped
//! implementation.

pub mod negotiate;
pub mod websocket;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

pub use websocket::{WebSocketConnection, WebSocketConnector};

/// Connection lifecycle as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Disconnected => 2,
            ConnectionState::Reconnecting => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Lock-free cell holding a [`ConnectionState`], readable from any task
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: ConnectionState) {
        self.0.store(state.as_u8(), Ordering::SeqCst);
    }
}

/// Failure to establish one connection
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid hub url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("negotiate request to {url} failed")]
    Negotiate {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("negotiate request to {url} returned HTTP {status}")]
    NegotiateStatus { url: String, status: u16 },

    #[error("hub refused negotiation: {0}")]
    NegotiateRejected(String),

    #[error("negotiation redirected to {0}, redirects are not followed")]
    Redirected(String),

    #[error("websocket upgrade to {url} failed")]
    Upgrade {
        url: String,
        #[source]
        source: Box<tungstenite::Error>,
    },

    #[error("timed out after {0:?} establishing the connection")]
    Timeout(std::time::Duration),

    #[error("hub handshake failed")]
    Handshake(#[source] Box<tungstenite::Error>),

    #[error("malformed handshake response")]
    HandshakeMalformed(#[source] crate::protocol::ProtocolError),

    #[error("hub rejected handshake: {0}")]
    HandshakeRejected(String),

    #[error("connection closed during handshake")]
    HandshakeClosed,

    #[error("failed to encode handshake")]
    Encode(#[source] serde_json::Error),
}

/// Failure of one hub invocation
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("connection is not usable (state {0:?})")]
    NotConnected(ConnectionState),

    #[error("connection closed before {method} completed")]
    ConnectionClosed { method: String },

    #[error("hub method {method} failed: {message}")]
    Hub { method: String, message: String },

    #[error("failed to encode invocation of {method}")]
    Encode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One established hub connection
#[async_trait]
pub trait HubConnection: Send + Sync {
    /// Identifier assigned at connect time, for diagnostics
    fn connection_id(&self) -> &str;

    /// Current state; never blocks
    fn state(&self) -> ConnectionState;

    /// Invoke a hub method and wait for its completion
    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> Result<Value, InvocationError>;
}

/// Shared handle to a connection
pub type SharedConnection = Arc<dyn HubConnection>;

/// Factory for hub connections
#[async_trait]
pub trait HubConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<SharedConnection, ConnectError>;
}
