//! Live connection primitives
//!
//! Sinks, the queue-backed [`Connection`], the shared fan-out set and the
//! JSON wire protocol. Transport-free, so relay and pacer logic can be
//! driven directly in tests.

pub mod broadcast;
pub mod connection;
pub mod protocol;
pub mod sink;

pub use broadcast::{BroadcastReport, BroadcastSet};
pub use connection::Connection;
pub use protocol::{close_code, ClientMessage, Inbound, Role, ServerMessage};
pub use sink::{ConnectionId, MessageSink, Outbound, SendError};
