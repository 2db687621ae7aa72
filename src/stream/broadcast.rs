//! Per-session fan-out set
//!
//! Shared by the relay's consumer set and the event hub's subscriber set.
//! A pass sends to every member first and prunes the dead ones afterwards,
//! so the member map is never mutated while it is being walked.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::sink::{ConnectionId, MessageSink, Outbound};

/// Outcome of one broadcast pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members whose queue accepted the message
    pub delivered: usize,
    /// Live members that skipped this message because their queue was full
    pub skipped: usize,
    /// Dead members removed after the pass
    pub pruned: usize,
}

/// Set of connections receiving the same messages
#[derive(Default)]
pub struct BroadcastSet {
    members: HashMap<ConnectionId, Arc<dyn MessageSink>>,
}

impl BroadcastSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member; returns `false` if it was already present
    pub fn insert(&mut self, sink: Arc<dyn MessageSink>) -> bool {
        self.members.insert(sink.id(), sink).is_none()
    }

    /// Remove a member; unknown ids are a no-op
    pub fn remove(&mut self, id: &ConnectionId) -> bool {
        self.members.remove(id).is_some()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Send `message` to every member, then drop the ones that are gone
    pub fn broadcast(&mut self, message: &Outbound) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut dead = Vec::new();

        for (id, sink) in &self.members {
            match sink.send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) if e.is_dead() => dead.push(*id),
                Err(_) => report.skipped += 1,
            }
        }

        for id in dead {
            debug!("Pruning dead connection {}", id);
            self.members.remove(&id);
            report.pruned += 1;
        }

        report
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::stream::sink::SendError;
    use parking_lot::Mutex;

    /// Transport stand-in recording what it was sent
    pub struct MockSink {
        id: ConnectionId,
        failure: Option<SendError>,
        pub received: Mutex<Vec<Outbound>>,
    }

    impl MockSink {
        pub fn live() -> Arc<Self> {
            Arc::new(Self {
                id: ConnectionId::new(),
                failure: None,
                received: Mutex::new(Vec::new()),
            })
        }

        pub fn dead() -> Arc<Self> {
            Self::failing(SendError::Closed)
        }

        pub fn failing(error: SendError) -> Arc<Self> {
            Arc::new(Self {
                id: ConnectionId::new(),
                failure: Some(error),
                received: Mutex::new(Vec::new()),
            })
        }

        pub fn texts(&self) -> Vec<String> {
            self.received
                .lock()
                .iter()
                .filter_map(|m| m.as_text().map(str::to_string))
                .collect()
        }
    }

    impl MessageSink for MockSink {
        fn id(&self) -> ConnectionId {
            self.id
        }

        fn send(&self, message: Outbound) -> Result<(), SendError> {
            if let Some(err) = self.failure {
                return Err(err);
            }
            self.received.lock().push(message);
            Ok(())
        }
    }
}
