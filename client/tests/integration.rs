//! Integration Tests for hubload
//!
//! These tests run the WebSocket transport and a full load session against
//! an in-process hub.

use hubload::config::LoadProfile;
use hubload::transport::websocket::WebSocketOptions;
use hubload::transport::{
    ConnectError, ConnectionState, HubConnector, InvocationError, WebSocketConnector,
};
use hubload::{InvocationScript, LoadSession};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::*;

// ============================================================================
// Transport Tests
// ============================================================================

mod transport {
    use super::*;

    #[tokio::test]
    async fn test_connect_and_invoke() {
        let hub = spawn_hub().await;
        let connector = WebSocketConnector::default();

        let connection = connector.connect(&hub.url("hubs")).await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert_eq!(connection.connection_id(), "test-conn-0");
        assert_eq!(hub.negotiations(), 1);

        let result = connection.invoke("Hello", Vec::new()).await.unwrap();
        assert_eq!(result, Value::String("Hello ok".to_string()));

        let result = connection.invoke("Bye", Vec::new()).await.unwrap();
        assert_eq!(result, Value::String("Bye ok".to_string()));
        assert_eq!(hub.invocations(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_invocations_are_matched_by_id() {
        let hub = spawn_hub().await;
        let connection = WebSocketConnector::default()
            .connect(&hub.url("hubs"))
            .await
            .unwrap();

        let (a, b, c) = tokio::join!(
            connection.invoke("A", Vec::new()),
            connection.invoke("B", Vec::new()),
            connection.invoke("C", Vec::new()),
        );
        assert_eq!(a.unwrap(), Value::String("A ok".to_string()));
        assert_eq!(b.unwrap(), Value::String("B ok".to_string()));
        assert_eq!(c.unwrap(), Value::String("C ok".to_string()));
    }

    #[tokio::test]
    async fn test_hub_error_is_reported() {
        let hub = spawn_hub().await;
        let connection = WebSocketConnector::default()
            .connect(&hub.url("hubs"))
            .await
            .unwrap();

        match connection.invoke("Fail", Vec::new()).await {
            Err(InvocationError::Hub { method, message }) => {
                assert_eq!(method, "Fail");
                assert_eq!(message, "Hub method failed");
            }
            other => panic!("expected hub error, got {:?}", other),
        }
        // The connection stays usable
        assert!(connection.invoke("Hello", Vec::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_skip_negotiation() {
        let hub = spawn_hub().await;
        let connector = WebSocketConnector::new(WebSocketOptions {
            skip_negotiation: true,
            ..WebSocketOptions::default()
        });

        let connection = connector.connect(&hub.url("hubs")).await.unwrap();
        assert!(connection.invoke("Hello", Vec::new()).await.is_ok());
        assert_eq!(hub.negotiations(), 0);
    }

    #[tokio::test]
    async fn test_handshake_rejection() {
        let hub = spawn_hub().await;

        let result = WebSocketConnector::default()
            .connect(&hub.url("reject"))
            .await;
        match result {
            Err(ConnectError::HandshakeRejected(message)) => {
                assert!(message.contains("not available"));
            }
            Err(e) => panic!("expected handshake rejection, got {}", e),
            Ok(_) => panic!("expected handshake rejection, got a connection"),
        }
    }

    #[tokio::test]
    async fn test_negotiate_http_error() {
        let hub = spawn_hub().await;

        let result = WebSocketConnector::default()
            .connect(&hub.url("missing"))
            .await;
        match result {
            Err(ConnectError::NegotiateStatus { status, .. }) => assert_eq!(status, 404),
            Err(e) => panic!("expected negotiate status error, got {}", e),
            Ok(_) => panic!("expected negotiate status error, got a connection"),
        }
    }

    #[tokio::test]
    async fn test_hub_close_disconnects() {
        let hub = spawn_hub().await;
        let connection = WebSocketConnector::default()
            .connect(&hub.url("closing"))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while connection.state() != ConnectionState::Disconnected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection should observe the hub's Close");

        assert!(matches!(
            connection.invoke("Hello", Vec::new()).await,
            Err(InvocationError::NotConnected(ConnectionState::Disconnected))
        ));
    }
}

// ============================================================================
// Load Session Tests
// ============================================================================

mod session {
    use super::*;

    #[tokio::test]
    async fn test_load_session_against_hub() {
        let hub = spawn_hub().await;
        let mut session = LoadSession::new(Arc::new(WebSocketConnector::default()));
        session
            .configure(
                hub.url("hubs"),
                InvocationScript::new(["Hello"], Duration::ZERO).into_body(),
            )
            .unwrap();

        let profile = LoadProfile {
            initial_clients: 2,
            max_clients: 5,
            step_clients: 2,
            step_interval_secs: 1,
            messaging_interval_secs: 0,
            duration_secs: 2,
        };
        session.run_for(&profile).unwrap();

        tokio::time::timeout(Duration::from_secs(10), session.wait_for_quiescence())
            .await
            .expect("session should wind down after its duration");

        assert!(session.is_stopped());
        assert_eq!(session.pool_size(), 4);
        assert_eq!(hub.negotiations(), 4);
        assert_eq!(hub.invocations(), 4, "one invocation per connection");
        assert_eq!(session.ramp_report().map(|r| r.failed), Some(0));
    }

    #[tokio::test]
    async fn test_unreachable_hub_leaves_pool_empty() {
        // Nothing listens on this port once the listener is dropped
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut session = LoadSession::new(Arc::new(WebSocketConnector::default()));
        session
            .configure(format!("http://{}/hubs", addr), None)
            .unwrap();
        let profile = LoadProfile {
            initial_clients: 3,
            max_clients: 3,
            step_clients: 0,
            step_interval_secs: 0,
            messaging_interval_secs: 0,
            duration_secs: 1,
        };
        session.run_for(&profile).unwrap();

        tokio::time::timeout(Duration::from_secs(10), session.wait_for_quiescence())
            .await
            .expect("session should wind down after its duration");

        assert_eq!(session.pool_size(), 0);
        assert_eq!(session.ramp_report().map(|r| r.failed), Some(3));
    }
}
