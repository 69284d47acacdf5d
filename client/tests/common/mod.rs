//! Common Test Utilities for Integration Tests
//!
//! An in-process hub speaking the JSON hub protocol over WebSocket, served
//! by axum on an ephemeral port.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const RS: char = '\u{1e}';

#[derive(Clone, Copy)]
enum Mode {
    /// Accept the handshake and complete every invocation
    Serve,
    /// Answer the handshake with an error
    RejectHandshake,
    /// Accept the handshake, then send Close
    CloseAfterHandshake,
}

#[derive(Clone, Default)]
struct HubState {
    negotiations: Arc<AtomicUsize>,
    invocations: Arc<AtomicUsize>,
}

/// Handle to a running test hub
pub struct TestHub {
    addr: SocketAddr,
    state: HubState,
}

impl TestHub {
    /// URL of a hub path, e.g. `hub.url("hubs")`
    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path)
    }

    pub fn negotiations(&self) -> usize {
        self.state.negotiations.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> usize {
        self.state.invocations.load(Ordering::SeqCst)
    }
}

/// Start a hub with three endpoints:
/// - `/hubs`: serves invocations; method `Fail` completes with an error
/// - `/reject`: rejects the handshake
/// - `/closing`: closes right after the handshake
pub async fn spawn_hub() -> TestHub {
    let state = HubState::default();

    let app = Router::new()
        .route("/hubs/negotiate", post(negotiate))
        .route("/hubs", get(serving_hub))
        .route("/reject/negotiate", post(negotiate))
        .route("/reject", get(rejecting_hub))
        .route("/closing/negotiate", post(negotiate))
        .route("/closing", get(closing_hub))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test hub");
    let addr = listener.local_addr().expect("test hub address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test hub server");
    });

    TestHub { addr, state }
}

async fn negotiate(State(state): State<HubState>) -> Json<Value> {
    let n = state.negotiations.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "negotiateVersion": 1,
        "connectionId": format!("test-conn-{}", n),
        "connectionToken": format!("test-token-{}", n),
        "availableTransports": [
            { "transport": "WebSockets", "transferFormats": ["Text", "Binary"] }
        ]
    }))
}

async fn serving_hub(ws: WebSocketUpgrade, State(state): State<HubState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_hub(socket, state, Mode::Serve))
}

async fn rejecting_hub(ws: WebSocketUpgrade, State(state): State<HubState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_hub(socket, state, Mode::RejectHandshake))
}

async fn closing_hub(ws: WebSocketUpgrade, State(state): State<HubState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_hub(socket, state, Mode::CloseAfterHandshake))
}

fn record(value: Value) -> Message {
    Message::Text(format!("{}{}", value, RS))
}

async fn run_hub(mut socket: WebSocket, state: HubState, mode: Mode) {
    let Some(Ok(Message::Text(handshake))) = socket.recv().await else {
        return;
    };
    assert!(
        handshake.contains("\"protocol\":\"json\""),
        "unexpected handshake {:?}",
        handshake
    );

    if let Mode::RejectHandshake = mode {
        let _ = socket
            .send(record(json!({ "error": "Requested protocol 'json' is not available." })))
            .await;
        return;
    }
    if socket.send(record(json!({}))).await.is_err() {
        return;
    }

    if let Mode::CloseAfterHandshake = mode {
        let _ = socket
            .send(record(json!({ "type": 7, "error": "Server is shutting down." })))
            .await;
        // Give the client a moment to read the Close record
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = socket.close().await;
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        for raw in text.split(RS).filter(|r| !r.is_empty()) {
            let Ok(value) = serde_json::from_str::<Value>(raw) else {
                continue;
            };
            if value["type"] != 1 {
                continue;
            }
            state.invocations.fetch_add(1, Ordering::SeqCst);

            let id = value["invocationId"].clone();
            let target = value["target"].as_str().unwrap_or_default().to_string();
            let reply = if target == "Fail" {
                json!({ "type": 3, "invocationId": id, "error": "Hub method failed" })
            } else {
                json!({ "type": 3, "invocationId": id, "result": format!("{} ok", target) })
            };
            if socket.send(record(reply)).await.is_err() {
                return;
            }
        }
    }
}
