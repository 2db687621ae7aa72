//! JSON messages exchanged over live connections
//!
//! Client messages are decoded once at the socket boundary into
//! [`Inbound`]; handlers match on [`ClientMessage`] variants.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::utils::now_rfc3339;

/// Messages a client may send
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Stop,
    Ping,
    RegisterProducer,
    RegisterConsumer,
    /// Producer frame; only the tag is inspected, the payload is relayed untouched
    Frame,
    Subscribe {
        #[serde(default)]
        event_types: Vec<String>,
    },
}

/// A decoded text frame from a client
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message {
        message: ClientMessage,
        /// Original text, forwarded as-is by the relay
        raw: Arc<str>,
    },
    /// Valid JSON with an unknown `type`, or not JSON at all
    Unrecognized { kind: Option<String> },
}

impl Inbound {
    pub fn decode(text: &str) -> Self {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => Inbound::Message {
                message,
                raw: Arc::from(text),
            },
            Err(_) => {
                let kind = serde_json::from_str::<serde_json::Value>(text)
                    .ok()
                    .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string));
                Inbound::Unrecognized { kind }
            }
        }
    }

    pub fn message(&self) -> Option<&ClientMessage> {
        match self {
            Inbound::Message { message, .. } => Some(message),
            Inbound::Unrecognized { .. } => None,
        }
    }
}

/// Relay role of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Producer,
    Consumer,
}

/// Messages the server sends
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        resolution: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        framerate: Option<u32>,
        timestamp: String,
    },
    Frame {
        data: String,
        timestamp_ms: i64,
    },
    Error {
        message: String,
    },
    Registered {
        role: Role,
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        producer_connected: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        frame_count: Option<u64>,
    },
    ProducerConnected {
        timestamp: String,
    },
    ProducerDisconnected {
        timestamp: String,
    },
    Pong,
    Subscribed {
        event_types: Vec<String>,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn producer_connected() -> Self {
        ServerMessage::ProducerConnected {
            timestamp: now_rfc3339(),
        }
    }

    pub fn producer_disconnected() -> Self {
        ServerMessage::ProducerDisconnected {
            timestamp: now_rfc3339(),
        }
    }
}

/// WebSocket close codes used by the gateway
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const INTERNAL: u16 = 1011;
    pub const AUTH_FAILED: u16 = 4001;
    pub const SESSION_NOT_FOUND: u16 = 4004;
}
