//! Outbound side of a live connection

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique id of one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to correlate log lines
        let s = self.0.simple().to_string();
        write!(f, "{}", &s[..8])
    }
}

/// A message queued for delivery to one connection
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// JSON text, serialized once and shared between recipients
    Text(Arc<str>),
    /// Video frame text; dropped first when a connection falls behind
    Frame(Arc<str>),
    /// Close the transport with a code and reason
    Close { code: u16, reason: String },
}

impl Outbound {
    /// Serialize a message once into a shareable payload
    pub fn json<T: Serialize>(message: &T) -> Result<Self, serde_json::Error> {
        Ok(Outbound::Text(Arc::from(serde_json::to_string(message)?)))
    }

    /// Text payload if this is a text or frame message
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Outbound::Text(text) | Outbound::Frame(text) => Some(text),
            Outbound::Close { .. } => None,
        }
    }

    /// Whether the message may be skipped for a slow connection
    pub fn is_frame(&self) -> bool {
        matches!(self, Outbound::Frame(_))
    }
}

/// Why a send did not reach the connection's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The connection is gone and must be dropped from any set
    Closed,
    /// The connection is alive but its queue is full (slow reader)
    Full,
}

impl SendError {
    /// Whether the connection should be pruned
    pub fn is_dead(&self) -> bool {
        matches!(self, SendError::Closed)
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Closed => write!(f, "connection closed"),
            SendError::Full => write!(f, "outbound queue full"),
        }
    }
}

impl std::error::Error for SendError {}

/// Anything a fan-out set can deliver to
///
/// `send` never blocks: implementations enqueue and return, so a set can
/// be walked while its lock is held.
pub trait MessageSink: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn send(&self, message: Outbound) -> Result<(), SendError>;
}
