//! JSON hub protocol messages
//!
//! Every message is a JSON object terminated by the record separator
//! (`0x1E`). A single WebSocket text frame may carry several records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Terminator appended to every JSON record
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Message type discriminators
pub mod kind {
    pub const INVOCATION: u8 = 1;
    pub const STREAM_ITEM: u8 = 2;
    pub const COMPLETION: u8 = 3;
    pub const PING: u8 = 6;
    pub const CLOSE: u8 = 7;
}

/// Protocol decoding errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed hub message")]
    Json(#[from] serde_json::Error),

    #[error("message of type {kind} is missing field `{field}`")]
    MissingField { kind: u8, field: &'static str },
}

/// First record sent by the client after the WebSocket upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl HandshakeRequest {
    pub fn json() -> Self {
        Self {
            protocol: "json".to_string(),
            version: 1,
        }
    }
}

/// Server answer to the handshake: `{}` on success
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Hub messages the client sends or understands
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Call a hub method. `invocation_id` is `None` for fire-and-forget calls.
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    /// Result of an earlier invocation
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    /// Keep-alive
    Ping,
    /// Server is closing the connection
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// Any message type this client does not act on
    Other(u8),
}

/// Flat wire shape shared by every message type
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow_reconnect: Option<bool>,
}

impl From<&HubMessage> for RawMessage {
    fn from(msg: &HubMessage) -> Self {
        match msg {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } => RawMessage {
                kind: kind::INVOCATION,
                invocation_id: invocation_id.clone(),
                target: Some(target.clone()),
                arguments: Some(arguments.clone()),
                ..Default::default()
            },
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => RawMessage {
                kind: kind::COMPLETION,
                invocation_id: Some(invocation_id.clone()),
                result: result.clone(),
                error: error.clone(),
                ..Default::default()
            },
            HubMessage::Ping => RawMessage {
                kind: kind::PING,
                ..Default::default()
            },
            HubMessage::Close {
                error,
                allow_reconnect,
            } => RawMessage {
                kind: kind::CLOSE,
                error: error.clone(),
                allow_reconnect: Some(*allow_reconnect),
                ..Default::default()
            },
            HubMessage::Other(kind) => RawMessage {
                kind: *kind,
                ..Default::default()
            },
        }
    }
}

impl TryFrom<RawMessage> for HubMessage {
    type Error = ProtocolError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let msg = match raw.kind {
            kind::INVOCATION => HubMessage::Invocation {
                invocation_id: raw.invocation_id,
                target: raw.target.ok_or(ProtocolError::MissingField {
                    kind: raw.kind,
                    field: "target",
                })?,
                arguments: raw.arguments.unwrap_or_default(),
            },
            kind::COMPLETION => HubMessage::Completion {
                invocation_id: raw.invocation_id.ok_or(ProtocolError::MissingField {
                    kind: raw.kind,
                    field: "invocationId",
                })?,
                result: raw.result,
                error: raw.error,
            },
            kind::PING => HubMessage::Ping,
            kind::CLOSE => HubMessage::Close {
                error: raw.error,
                allow_reconnect: raw.allow_reconnect.unwrap_or(false),
            },
            other => HubMessage::Other(other),
        };
        Ok(msg)
    }
}

/// Encode the JSON handshake record
pub fn encode_handshake() -> Result<String, serde_json::Error> {
    let mut record = serde_json::to_string(&HandshakeRequest::json())?;
    record.push(RECORD_SEPARATOR);
    Ok(record)
}

/// Decode the handshake response at the start of `frame`.
///
/// Returns the response and whatever follows its separator, which the
/// server may have packed into the same frame.
pub fn decode_handshake(frame: &str) -> Result<(HandshakeResponse, &str), ProtocolError> {
    let (record, rest) = frame.split_once(RECORD_SEPARATOR).unwrap_or((frame, ""));
    let response = serde_json::from_str(record)?;
    Ok((response, rest))
}

/// Encode one message as a terminated record
pub fn encode(msg: &HubMessage) -> Result<String, serde_json::Error> {
    let mut record = serde_json::to_string(&RawMessage::from(msg))?;
    record.push(RECORD_SEPARATOR);
    Ok(record)
}

/// Decode every record in a frame. Each record decodes independently so one
/// malformed record does not hide the others.
pub fn decode_frame(frame: &str) -> Vec<Result<HubMessage, ProtocolError>> {
    frame
        .split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
        .map(|record| {
            let raw: RawMessage = serde_json::from_str(record)?;
            HubMessage::try_from(raw)
        })
        .collect()
}
