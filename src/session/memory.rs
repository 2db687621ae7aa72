//! In-process session store

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{EventLog, SessionDescriptor, SessionDirectory, SessionStatus, TelemetryRecord};
use crate::error::Result;

#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, SessionDescriptor>>,
    events: RwLock<Vec<TelemetryRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, descriptor: SessionDescriptor) {
        self.sessions
            .write()
            .insert(descriptor.id.clone(), descriptor);
    }

    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.sessions.read().get(session_id).map(|s| s.status)
    }

    pub fn events(&self) -> Vec<TelemetryRecord> {
        self.events.read().clone()
    }
}

#[async_trait]
impl SessionDirectory for MemoryStore {
    async fn lookup(&self, session_id: &str, principal: &str) -> Result<Option<SessionDescriptor>> {
        Ok(self
            .sessions
            .read()
            .get(session_id)
            .filter(|s| s.owner.as_deref() == Some(principal))
            .cloned())
    }

    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        if let Some(session) = self.sessions.write().get_mut(session_id) {
            session.status = status;
        }
        Ok(())
    }
}

#[async_trait]
impl EventLog for MemoryStore {
    async fn append(&self, record: TelemetryRecord) -> Result<()> {
        self.events.write().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SourceKind;

    fn descriptor(id: &str, owner: &str) -> SessionDescriptor {
        SessionDescriptor {
            id: id.into(),
            owner: Some(owner.into()),
            source_kind: SourceKind::MobileRelay,
            source_locator: String::new(),
            resolution: None,
            framerate: None,
            status: SessionStatus::Pending,
        }
    }

    #[tokio::test]
    async fn test_lookup_scoped_to_owner() {
        let store = MemoryStore::new();
        store.insert(descriptor("s1", "alice"));

        assert!(store.lookup("s1", "alice").await.unwrap().is_some());
        assert!(store.lookup("s1", "bob").await.unwrap().is_none());
        assert!(store.lookup("missing", "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_status_and_append() {
        let store = MemoryStore::new();
        store.insert(descriptor("s1", "alice"));

        store.set_status("s1", SessionStatus::Recording).await.unwrap();
        store.set_status("unknown", SessionStatus::Error).await.unwrap();
        assert_eq!(store.status("s1"), Some(SessionStatus::Recording));

        store
            .append(TelemetryRecord {
                session_id: "s1".into(),
                timestamp_ms: 1,
                event_type: "shot".into(),
                event_data: serde_json::json!({"speed": 3}),
            })
            .await
            .unwrap();
        assert_eq!(store.events().len(), 1);
    }
}
