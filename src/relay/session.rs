//! Per-session producer/consumer fan-out

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::stream::{
    BroadcastReport, BroadcastSet, ConnectionId, MessageSink, Outbound, Role, ServerMessage,
};

/// Point-in-time view of a relay session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySnapshot {
    pub producer_connected: bool,
    pub consumers: usize,
    pub frame_count: u64,
}

struct RelayState {
    producer: Option<Arc<dyn MessageSink>>,
    consumers: BroadcastSet,
    frame_count: u64,
}

/// One producer slot, any number of consumers, and a frame counter
///
/// All mutation happens under one short lock. Sends are non-blocking
/// queue pushes, so ordering between acknowledgements, notices and frames
/// is fixed by lock order: a consumer's `registered` ack always precedes
/// any frame it receives.
pub struct RelaySession {
    session_id: String,
    state: Mutex<RelayState>,
}

impl RelaySession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: Mutex::new(RelayState {
                producer: None,
                consumers: BroadcastSet::new(),
                frame_count: 0,
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        let state = self.state.lock();
        RelaySnapshot {
            producer_connected: state.producer.is_some(),
            consumers: state.consumers.len(),
            frame_count: state.frame_count,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.state.lock().frame_count
    }

    /// No producer and no consumers
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.producer.is_none() && state.consumers.is_empty()
    }

    pub fn is_producer(&self, id: &ConnectionId) -> bool {
        self.state
            .lock()
            .producer
            .as_ref()
            .is_some_and(|p| p.id() == *id)
    }

    /// Take the producer slot; an occupied slot is left untouched
    pub fn attach_producer(&self, sink: Arc<dyn MessageSink>) -> Result<()> {
        let mut state = self.state.lock();
        if state.producer.is_some() {
            return Err(AppError::ProducerConflict);
        }

        let _ = sink.send(registered(Role::Producer, &self.session_id, None, None));
        let id = sink.id();
        state.producer = Some(sink);

        if let Ok(notice) = Outbound::json(&ServerMessage::producer_connected()) {
            state.consumers.broadcast(&notice);
        }
        info!(
            session = %self.session_id,
            producer = %id,
            consumers = state.consumers.len(),
            "Producer registered"
        );
        Ok(())
    }

    /// Join as a consumer; the acknowledgement carries the current snapshot
    pub fn attach_consumer(&self, sink: Arc<dyn MessageSink>) -> RelaySnapshot {
        let mut state = self.state.lock();
        let producer_connected = state.producer.is_some();
        let frame_count = state.frame_count;

        let _ = sink.send(registered(
            Role::Consumer,
            &self.session_id,
            Some(producer_connected),
            Some(frame_count),
        ));
        let id = sink.id();
        state.consumers.insert(sink);

        info!(
            session = %self.session_id,
            consumer = %id,
            consumers = state.consumers.len(),
            "Consumer registered"
        );
        RelaySnapshot {
            producer_connected,
            consumers: state.consumers.len(),
            frame_count,
        }
    }

    /// Forward a producer's frame text verbatim to every consumer
    ///
    /// Returns `None` if `from` does not hold the producer slot.
    pub fn relay_frame(&self, from: &ConnectionId, raw: Arc<str>) -> Option<BroadcastReport> {
        let mut state = self.state.lock();
        if !state.producer.as_ref().is_some_and(|p| p.id() == *from) {
            return None;
        }
        state.frame_count += 1;
        Some(state.consumers.broadcast(&Outbound::Frame(raw)))
    }

    /// Clear the producer slot if `id` holds it and notify consumers
    ///
    /// Returns whether the slot was cleared; repeated calls are no-ops.
    pub fn detach_producer(&self, id: &ConnectionId) -> bool {
        let mut state = self.state.lock();
        if !state.producer.as_ref().is_some_and(|p| p.id() == *id) {
            return false;
        }
        state.producer = None;

        if let Ok(notice) = Outbound::json(&ServerMessage::producer_disconnected()) {
            state.consumers.broadcast(&notice);
        }
        info!(
            session = %self.session_id,
            frames = state.frame_count,
            consumers = state.consumers.len(),
            "Producer disconnected"
        );
        true
    }

    /// Remove a consumer; unknown ids are a no-op
    pub fn detach_consumer(&self, id: &ConnectionId) -> bool {
        let removed = self.state.lock().consumers.remove(id);
        if removed {
            debug!(session = %self.session_id, consumer = %id, "Consumer removed");
        }
        removed
    }
}

fn registered(
    role: Role,
    session_id: &str,
    producer_connected: Option<bool>,
    frame_count: Option<u64>,
) -> Outbound {
    let message = ServerMessage::Registered {
        role,
        session_id: session_id.to_string(),
        producer_connected,
        frame_count,
    };
    // Plain enum of strings and numbers; serialization cannot fail
    Outbound::json(&message).unwrap_or_else(|_| Outbound::Text(Arc::from("{}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::broadcast::testing::MockSink;
    use crate::stream::Connection;

    fn json(text: &str) -> serde_json::Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_single_producer_enforced() {
        let session = RelaySession::new("S1");
        let first = MockSink::live();
        let second = MockSink::live();

        session.attach_producer(first.clone()).unwrap();
        let err = session.attach_producer(second.clone()).unwrap_err();
        assert!(matches!(err, AppError::ProducerConflict));

        assert!(session.is_producer(&first.id()));
        assert!(!session.is_producer(&second.id()));
        // The rejected sink got nothing from the session itself
        assert!(second.texts().is_empty());
    }

    #[test]
    fn test_consumer_before_producer_sequence() {
        let session = RelaySession::new("S1");
        let consumer = MockSink::live();
        let producer = MockSink::live();

        let snap = session.attach_consumer(consumer.clone());
        assert!(!snap.producer_connected);

        session.attach_producer(producer.clone()).unwrap();
        session.relay_frame(&producer.id(), Arc::from(r#"{"type":"frame","n":1}"#));
        session.relay_frame(&producer.id(), Arc::from(r#"{"type":"frame","n":2}"#));

        let texts = consumer.texts();
        assert_eq!(texts.len(), 4);
        assert_eq!(json(&texts[0])["type"], "registered");
        assert_eq!(json(&texts[0])["producer_connected"], false);
        assert_eq!(json(&texts[1])["type"], "producer_connected");
        assert_eq!(json(&texts[2])["n"], 1);
        assert_eq!(json(&texts[3])["n"], 2);
    }

    #[test]
    fn test_frames_from_non_producer_ignored() {
        let session = RelaySession::new("S1");
        let consumer = MockSink::live();
        session.attach_consumer(consumer.clone());

        assert!(session
            .relay_frame(&consumer.id(), Arc::from("{}"))
            .is_none());
        assert_eq!(session.frame_count(), 0);
    }

    #[test]
    fn test_dead_consumers_dropped_during_relay() {
        let session = RelaySession::new("S1");
        let producer = MockSink::live();
        let live = MockSink::live();
        session.attach_producer(producer.clone()).unwrap();
        session.attach_consumer(live.clone());
        session.attach_consumer(MockSink::dead());

        let report = session
            .relay_frame(&producer.id(), Arc::from(r#"{"type":"frame"}"#))
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, 1);
        assert_eq!(session.snapshot().consumers, 1);
    }

    #[test]
    fn test_detach_producer_notifies_once() {
        let session = RelaySession::new("S1");
        let producer = MockSink::live();
        let consumer = MockSink::live();
        session.attach_consumer(consumer.clone());
        session.attach_producer(producer.clone()).unwrap();

        assert!(session.detach_producer(&producer.id()));
        assert!(!session.detach_producer(&producer.id()));

        let disconnects = consumer
            .texts()
            .iter()
            .filter(|t| json(t)["type"] == "producer_disconnected")
            .count();
        assert_eq!(disconnects, 1);

        assert!(session.detach_consumer(&consumer.id()));
        assert!(!session.detach_consumer(&consumer.id()));
        assert!(session.is_idle());
    }

    #[test]
    fn test_lagging_consumer_still_told_producer_left() {
        let session = RelaySession::new("S1");
        let producer = MockSink::live();
        let (consumer, mut rx) = Connection::detached(4);
        session.attach_consumer(consumer.clone());
        session.attach_producer(producer.clone()).unwrap();

        let mut skipped = 0;
        for n in 0..10 {
            let frame = Arc::from(format!(r#"{{"type":"frame","n":{}}}"#, n));
            skipped += session.relay_frame(&producer.id(), frame).unwrap().skipped;
        }
        assert!(skipped > 0);
        assert_eq!(session.frame_count(), 10);

        assert!(session.detach_producer(&producer.id()));

        let mut types = Vec::new();
        while let Ok(message) = rx.try_recv() {
            types.push(json(message.as_text().unwrap())["type"].clone());
        }
        assert_eq!(types.first().unwrap(), "registered");
        assert_eq!(types.last().unwrap(), "producer_disconnected");
        assert_eq!(types.iter().filter(|t| *t == "producer_connected").count(), 1);
        assert_eq!(types.iter().filter(|t| *t == "producer_disconnected").count(), 1);
        assert_eq!(session.snapshot().consumers, 1);
    }
}
