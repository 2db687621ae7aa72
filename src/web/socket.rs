//! WebSocket ↔ [`Connection`] bridge
//!
//! A writer task drains the connection's outbound queue into the socket;
//! a reader task decodes client text frames into the inbound channel.
//! Either half ending is visible to the handler: a dead writer closes the
//! queue, a dead reader closes the inbound channel.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::stream::{close_code, Connection, Inbound, MessageSink, Outbound};

const INBOUND_QUEUE: usize = 32;
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct SocketPump {
    pub conn: Arc<Connection>,
    pub inbound: mpsc::Receiver<Inbound>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl SocketPump {
    pub fn attach(socket: WebSocket, outbound_queue: usize) -> Self {
        let (conn, mut outbound) = Connection::detached(outbound_queue);
        let (in_tx, inbound) = mpsc::channel(INBOUND_QUEUE);
        let (mut sender, mut receiver) = socket.split();
        let id = conn.id();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                let (frame, last) = match message {
                    Outbound::Text(text) | Outbound::Frame(text) => {
                        (Message::Text(text.to_string()), false)
                    }
                    Outbound::Close { code, reason } => (
                        Message::Close(Some(CloseFrame {
                            code,
                            reason: Cow::Owned(reason),
                        })),
                        true,
                    ),
                };
                if let Err(e) = sender.send(frame).await {
                    debug!("Send to {} failed: {}", id, e);
                    break;
                }
                if last {
                    break;
                }
            }
            let _ = sender.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = receiver.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(Inbound::decode(&text)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(other) => trace!("Ignoring non-text frame from {}: {:?}", id, other),
                    Err(e) => {
                        debug!("Receive from {} failed: {}", id, e);
                        break;
                    }
                }
            }
        });

        Self {
            conn,
            inbound,
            reader,
            writer,
        }
    }

    /// Close normally (no-op if a handler already closed) and wait for the writer
    pub async fn finish(self) {
        self.conn.close(close_code::NORMAL, "");
        self.reader.abort();
        drop(self.inbound);
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, self.writer).await.is_err() {
            debug!("Writer for {} did not drain in time", self.conn.id());
        }
    }
}
