//! WebSocket hub transport
//!
//! Each connection owns three background tasks: a reader that decodes hub
//! records and resolves pending invocations, a writer that drains the
//! outgoing queue into the socket, and a keep-alive that pings the hub.

use super::negotiate::{self, parse_hub_url};
use super::{
    AtomicConnectionState, ConnectError, ConnectionState, HubConnection, HubConnector,
    InvocationError, SharedConnection,
};
use crate::protocol::{self, HubMessage};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use uuid::Uuid;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingResult = Result<Value, String>;

/// Outgoing queue depth per connection
const OUTGOING_QUEUE: usize = 32;

/// Transport tuning
#[derive(Debug, Clone)]
pub struct WebSocketOptions {
    /// Skip `POST /negotiate` and connect the WebSocket directly
    pub skip_negotiation: bool,
    /// Upper bound on negotiate + upgrade + handshake
    pub connect_timeout: Duration,
    /// Interval between keep-alive pings
    pub keep_alive_interval: Duration,
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        Self {
            skip_negotiation: false,
            connect_timeout: Duration::from_secs(30),
            keep_alive_interval: Duration::from_secs(15),
        }
    }
}

/// Opens hub connections over WebSocket using the JSON hub protocol
pub struct WebSocketConnector {
    http: reqwest::Client,
    options: WebSocketOptions,
}

impl WebSocketConnector {
    pub fn new(options: WebSocketOptions) -> Self {
        Self {
            http: reqwest::Client::new(),
            options,
        }
    }

    async fn establish(&self, url: &str) -> Result<WebSocketConnection, ConnectError> {
        let hub = parse_hub_url(url)?;

        let (connection_id, ws_url) = if self.options.skip_negotiation {
            (
                Uuid::new_v4().to_string(),
                negotiate::websocket_url(&hub, None)?,
            )
        } else {
            let negotiated = negotiate::negotiate(&self.http, &hub).await?;
            let ws_url = negotiate::websocket_url(&hub, negotiated.transport_id())?;
            let connection_id = negotiated
                .connection_id
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            (connection_id, ws_url)
        };

        let (socket, _) =
            connect_async(ws_url.as_str())
                .await
                .map_err(|e| ConnectError::Upgrade {
                    url: ws_url.to_string(),
                    source: Box::new(e),
                })?;

        let (mut sink, mut stream) = socket.split();
        let leftover = handshake(&mut sink, &mut stream).await?;

        debug!("Hub handshake completed for connection {}", connection_id);

        Ok(WebSocketConnection::spawn(
            connection_id,
            sink,
            stream,
            leftover,
            self.options.keep_alive_interval,
        ))
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(WebSocketOptions::default())
    }
}

#[async_trait]
impl HubConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<SharedConnection, ConnectError> {
        let timeout = self.options.connect_timeout;
        let connection = tokio::time::timeout(timeout, self.establish(url))
            .await
            .map_err(|_| ConnectError::Timeout(timeout))??;
        Ok(Arc::new(connection))
    }
}

/// Send the handshake and wait for the answer. Returns any records that
/// arrived in the same frame after the handshake response.
async fn handshake(
    sink: &mut SplitSink<Socket, Message>,
    stream: &mut SplitStream<Socket>,
) -> Result<String, ConnectError> {
    let request = protocol::encode_handshake().map_err(ConnectError::Encode)?;
    sink.send(Message::Text(request.into()))
        .await
        .map_err(|e| ConnectError::Handshake(Box::new(e)))?;

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let (response, rest) = protocol::decode_handshake(text.as_str())
                    .map_err(ConnectError::HandshakeMalformed)?;
                if let Some(error) = response.error {
                    return Err(ConnectError::HandshakeRejected(error));
                }
                return Ok(rest.to_string());
            }
            Ok(Message::Close(_)) => return Err(ConnectError::HandshakeClosed),
            Ok(_) => continue,
            Err(e) => return Err(ConnectError::Handshake(Box::new(e))),
        }
    }

    Err(ConnectError::HandshakeClosed)
}

/// State shared between a connection handle and its background tasks
struct Shared {
    connection_id: String,
    state: AtomicConnectionState,
    pending: DashMap<String, oneshot::Sender<PendingResult>>,
}

impl Shared {
    /// Apply every record in a frame. Returns `false` once the hub sent Close.
    fn dispatch(&self, frame: &str) -> bool {
        for record in protocol::decode_frame(frame) {
            match record {
                Ok(HubMessage::Completion {
                    invocation_id,
                    result,
                    error,
                }) => {
                    if let Some((_, waiter)) = self.pending.remove(&invocation_id) {
                        let outcome = match error {
                            Some(message) => Err(message),
                            None => Ok(result.unwrap_or(Value::Null)),
                        };
                        let _ = waiter.send(outcome);
                    } else {
                        debug!(
                            "Completion for unknown invocation {} on connection {}",
                            invocation_id, self.connection_id
                        );
                    }
                }
                Ok(HubMessage::Close { error, .. }) => {
                    match error {
                        Some(error) => warn!(
                            "Hub closed connection {}: {}",
                            self.connection_id, error
                        ),
                        None => debug!("Hub closed connection {}", self.connection_id),
                    }
                    return false;
                }
                Ok(HubMessage::Invocation { target, .. }) => {
                    debug!(
                        "Ignoring hub call to client method {} on connection {}",
                        target, self.connection_id
                    );
                }
                Ok(HubMessage::Ping) | Ok(HubMessage::Other(_)) => {}
                Err(e) => {
                    warn!(
                        "Malformed hub message on connection {}: {}",
                        self.connection_id,
                        crate::error::error_chain(&e)
                    );
                }
            }
        }
        true
    }

    /// Mark the connection unusable and fail every pending invocation
    fn close(&self) {
        self.state.store(ConnectionState::Disconnected);
        // Dropping the senders wakes the waiters with a receive error
        self.pending.clear();
    }
}

/// One hub connection over WebSocket
pub struct WebSocketConnection {
    shared: Arc<Shared>,
    outgoing: mpsc::Sender<Message>,
    next_invocation: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
}

impl WebSocketConnection {
    fn spawn(
        connection_id: String,
        sink: SplitSink<Socket, Message>,
        stream: SplitStream<Socket>,
        leftover: String,
        keep_alive_interval: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            connection_id,
            state: AtomicConnectionState::new(ConnectionState::Connected),
            pending: DashMap::new(),
        });
        let (outgoing, rx) = mpsc::channel::<Message>(OUTGOING_QUEUE);

        let reader = tokio::spawn(read_loop(shared.clone(), stream, leftover));
        let writer = tokio::spawn(write_loop(shared.clone(), sink, rx));
        let keep_alive = tokio::spawn(keep_alive_loop(outgoing.clone(), keep_alive_interval));

        Self {
            shared,
            outgoing,
            next_invocation: AtomicU64::new(1),
            tasks: vec![reader, writer, keep_alive],
        }
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl HubConnection for WebSocketConnection {
    fn connection_id(&self) -> &str {
        &self.shared.connection_id
    }

    fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> Result<Value, InvocationError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(InvocationError::NotConnected(state));
        }

        let invocation_id = self.next_invocation.fetch_add(1, Ordering::Relaxed).to_string();
        let record = protocol::encode(&HubMessage::Invocation {
            invocation_id: Some(invocation_id.clone()),
            target: method.to_string(),
            arguments,
        })
        .map_err(|source| InvocationError::Encode {
            method: method.to_string(),
            source,
        })?;

        let closed = || InvocationError::ConnectionClosed {
            method: method.to_string(),
        };

        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(invocation_id.clone(), tx);

        // close() stores the state before clearing the table, so a waiter
        // registered after the clear is caught here
        if self.state() != ConnectionState::Connected {
            self.shared.pending.remove(&invocation_id);
            return Err(closed());
        }

        if self.outgoing.send(Message::Text(record.into())).await.is_err() {
            self.shared.pending.remove(&invocation_id);
            return Err(closed());
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(InvocationError::Hub {
                method: method.to_string(),
                message,
            }),
            Err(_) => Err(closed()),
        }
    }
}

async fn read_loop(shared: Arc<Shared>, mut stream: SplitStream<Socket>, leftover: String) {
    if shared.dispatch(&leftover) {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if !shared.dispatch(text.as_str()) {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(
                        "Read error on connection {}: {}",
                        shared.connection_id, e
                    );
                    break;
                }
            }
        }
    }

    debug!("Connection {} disconnected", shared.connection_id);
    shared.close();
}

async fn write_loop(
    shared: Arc<Shared>,
    mut sink: SplitSink<Socket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = sink.send(message).await {
            debug!(
                "Write error on connection {}: {}",
                shared.connection_id, e
            );
            break;
        }
    }
    shared.close();
}

async fn keep_alive_loop(outgoing: mpsc::Sender<Message>, period: Duration) {
    if period.is_zero() {
        return;
    }

    let ping = match protocol::encode(&HubMessage::Ping) {
        Ok(record) => record,
        Err(e) => {
            warn!("Failed to encode keep-alive ping: {}", e);
            return;
        }
    };

    let mut interval = tokio::time::interval(period);
    // First tick fires immediately; the handshake just proved liveness
    interval.tick().await;
    loop {
        interval.tick().await;
        if outgoing.send(Message::Text(ping.clone().into())).await.is_err() {
            break;
        }
    }
}
