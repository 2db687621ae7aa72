//! Session id → relay session map
//!
//! Attachments happen under the map lock, and an entry is only removed
//! under the same lock once its session is idle. A session can therefore
//! never be collected between being looked up and being joined.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::session::{RelaySession, RelaySnapshot};
use crate::error::Result;
use crate::stream::MessageSink;

#[derive(Default)]
pub struct RelayRegistry {
    sessions: Mutex<HashMap<String, Arc<RelaySession>>>,
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the producer slot of `session_id`, creating the session lazily
    pub fn register_producer(
        &self,
        session_id: &str,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Arc<RelaySession>> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(RelaySession::new(session_id)))
            .clone();
        session.attach_producer(sink)?;
        Ok(session)
    }

    /// Join `session_id` as a consumer, creating the session lazily
    pub fn register_consumer(
        &self,
        session_id: &str,
        sink: Arc<dyn MessageSink>,
    ) -> (Arc<RelaySession>, RelaySnapshot) {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(RelaySession::new(session_id)))
            .clone();
        let snapshot = session.attach_consumer(sink);
        (session, snapshot)
    }

    pub fn lookup(&self, session_id: &str) -> Option<Arc<RelaySession>> {
        self.sessions.lock().get(session_id).cloned()
    }

    pub fn snapshot(&self, session_id: &str) -> Option<RelaySnapshot> {
        self.lookup(session_id).map(|s| s.snapshot())
    }

    /// Drop the entry if `session` is still the registered one and idle
    pub fn collect_if_idle(&self, session: &Arc<RelaySession>) -> bool {
        let mut sessions = self.sessions.lock();
        let id = session.session_id();
        let current = sessions
            .get(id)
            .is_some_and(|s| Arc::ptr_eq(s, session));
        if current && session.is_idle() {
            sessions.remove(id);
            debug!(session = %id, "Relay session removed");
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
