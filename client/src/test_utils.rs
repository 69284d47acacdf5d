//! Test Utilities Module
//!
//! Scripted in-memory transport for exercising the session without a hub.
//! This module is only compiled when running tests.

#![cfg(test)]

use crate::session::connection::{InvocationBody, invocation_body};
use crate::transport::{
    AtomicConnectionState, ConnectError, ConnectionState, HubConnection, HubConnector,
    InvocationError, SharedConnection,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Mock Connection
// ============================================================================

/// In-memory connection that records every invocation.
///
/// Invoking the method `"Fail"` returns a hub error.
pub struct MockConnection {
    id: String,
    state: AtomicConnectionState,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl MockConnection {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: AtomicConnectionState::new(ConnectionState::Connected),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state);
    }

    /// Invoked method names in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }

    /// Virtual time of each invocation
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl HubConnection for MockConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> ConnectionState {
        self.state.load()
    }

    async fn invoke(&self, method: &str, _arguments: Vec<Value>) -> Result<Value, InvocationError> {
        let state = self.state.load();
        if state != ConnectionState::Connected {
            return Err(InvocationError::NotConnected(state));
        }

        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), Instant::now()));

        if method == "Fail" {
            return Err(InvocationError::Hub {
                method: method.to_string(),
                message: "mock failure".to_string(),
            });
        }
        Ok(Value::Null)
    }
}

// ============================================================================
// Mock Connector
// ============================================================================

/// Connector handing out [`MockConnection`]s.
///
/// Attempts are numbered from 0 in the order `connect` is called; attempts
/// listed in `failing` return a [`ConnectError`].
pub struct MockConnector {
    attempts: AtomicUsize,
    failing: HashSet<usize>,
    connect_delay: Duration,
    initial_state: ConnectionState,
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            attempts: AtomicUsize::new(0),
            failing: HashSet::new(),
            connect_delay: Duration::ZERO,
            initial_state: ConnectionState::Connected,
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_attempts(mut self, attempts: impl IntoIterator<Item = usize>) -> Self {
        self.failing.extend(attempts);
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_initial_state(mut self, state: ConnectionState) -> Self {
        self.initial_state = state;
        self
    }

    /// Number of `connect` calls so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Every connection handed out so far
    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections.lock().unwrap().clone()
    }

    /// Total invocations across every connection
    pub fn total_calls(&self) -> usize {
        self.connections().iter().map(|c| c.calls().len()).sum()
    }
}

#[async_trait]
impl HubConnector for MockConnector {
    async fn connect(&self, url: &str) -> Result<SharedConnection, ConnectError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);

        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        if self.failing.contains(&attempt) {
            return Err(ConnectError::Upgrade {
                url: url.to_string(),
                source: Box::new(tokio_tungstenite::tungstenite::Error::ConnectionClosed),
            });
        }

        let connection = Arc::new(MockConnection::new(&format!("mock-{}", attempt)));
        connection.set_state(self.initial_state);
        self.connections.lock().unwrap().push(connection.clone());
        Ok(connection)
    }
}

// ============================================================================
// Bodies
// ============================================================================

/// Body invoking `Ping` once per tick
pub fn ping_body() -> InvocationBody {
    invocation_body(|connection: SharedConnection| async move {
        connection.invoke("Ping", Vec::new()).await?;
        Ok(())
    })
}
