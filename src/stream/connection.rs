//! Queue-backed connection handle
//!
//! Handlers and fan-out sets write into a bounded queue; a writer task
//! owned by the transport drains it. Dropping the receiver (transport
//! gone) makes every later send report [`SendError::Closed`].
//!
//! Frames may only fill `capacity` slots of the queue. The last
//! [`CONTROL_RESERVE`] slots stay free for notices, errors and the close
//! frame, so a viewer that lags on frames still learns what happened.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use super::protocol::ServerMessage;
use super::sink::{ConnectionId, MessageSink, Outbound, SendError};

/// Queue slots frames can never take
pub const CONTROL_RESERVE: usize = 16;

pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    closed: AtomicBool,
}

impl Connection {
    /// Create a connection not yet bound to a transport
    ///
    /// The returned receiver is the outbound queue; the socket writer (or a
    /// test) consumes it.
    pub fn detached(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1) + CONTROL_RESERVE);
        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            tx,
            closed: AtomicBool::new(false),
        });
        (conn, rx)
    }

    /// Serialize and queue a server message
    pub fn send_message(&self, message: &ServerMessage) -> Result<(), SendError> {
        match Outbound::json(message) {
            Ok(payload) => self.send(payload),
            Err(e) => {
                warn!("Failed to serialize message for {}: {}", self.id, e);
                Ok(())
            }
        }
    }

    /// Queue a video frame; skipped with [`SendError::Full`] when the
    /// connection is already `capacity` frames behind
    pub fn send_frame(&self, message: &ServerMessage) -> Result<(), SendError> {
        match Outbound::json(message) {
            Ok(Outbound::Text(text)) => self.send(Outbound::Frame(text)),
            Ok(other) => self.send(other),
            Err(e) => {
                warn!("Failed to serialize frame for {}: {}", self.id, e);
                Ok(())
            }
        }
    }

    /// Queue a close frame; nothing is sent after it
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.try_send(Outbound::Close {
            code,
            reason: reason.into(),
        });
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }
}

impl MessageSink for Connection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, message: Outbound) -> Result<(), SendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SendError::Closed);
        }
        if message.is_frame() && self.tx.capacity() <= CONTROL_RESERVE {
            return if self.tx.is_closed() {
                self.closed.store(true, Ordering::SeqCst);
                Err(SendError::Closed)
            } else {
                Err(SendError::Full)
            };
        }
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SendError::Full),
            Err(TrySendError::Closed(_)) => {
                self.closed.store(true, Ordering::SeqCst);
                Err(SendError::Closed)
            }
        }
    }
}
