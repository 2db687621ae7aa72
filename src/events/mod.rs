//! Event broadcast hub for telemetry notifications
//!
//! Per-session subscriber sets for non-video notifications (shots, fouls,
//! status changes). Uses the same [`BroadcastSet`] fan-out as the relay's
//! consumer set.
//!
//! # Example
//!
//! ```no_run
//! use poolcam::events::EventHub;
//! use poolcam::stream::Connection;
//!
//! let hub = EventHub::new();
//! let (conn, _rx) = Connection::detached(16);
//! hub.subscribe("session-1", conn.clone());
//! hub.broadcast_pocket("session-1", "8", "corner");
//! ```

pub mod types;

pub use types::{GenericEvent, TelemetryEvent};

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::error::Result;
use crate::session::{EventLog, SessionStatus, TelemetryRecord};
use crate::stream::{BroadcastReport, BroadcastSet, ConnectionId, MessageSink, Outbound};
use crate::utils::{now_ms, LogThrottler};

fn throttle_key(session_id: &str) -> String {
    format!("events:{}", session_id)
}

/// Per-session subscriber registry
pub struct EventHub {
    sessions: Mutex<HashMap<String, BroadcastSet>>,
    throttler: LogThrottler,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            throttler: LogThrottler::with_secs(5),
        }
    }

    pub fn subscribe(&self, session_id: &str, sink: Arc<dyn MessageSink>) {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(sink);
    }

    /// Remove a subscriber; the session entry goes away with its last one
    pub fn unsubscribe(&self, session_id: &str, id: &ConnectionId) {
        let mut sessions = self.sessions.lock();
        if let Some(set) = sessions.get_mut(session_id) {
            set.remove(id);
            if set.is_empty() {
                sessions.remove(session_id);
                self.throttler.clear(&throttle_key(session_id));
            }
        }
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.sessions
            .lock()
            .get(session_id)
            .map(BroadcastSet::len)
            .unwrap_or(0)
    }

    /// Number of sessions with at least one subscriber
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Serialize `message` once and send it to every subscriber of the
    /// session. Sessions without subscribers are a no-op.
    pub fn broadcast<T: Serialize>(&self, session_id: &str, message: &T) -> BroadcastReport {
        let payload = match Outbound::json(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize event for session {}: {}", session_id, e);
                return BroadcastReport::default();
            }
        };

        let mut sessions = self.sessions.lock();
        let Some(set) = sessions.get_mut(session_id) else {
            return BroadcastReport::default();
        };

        let report = set.broadcast(&payload);
        if set.is_empty() {
            sessions.remove(session_id);
            self.throttler.clear(&throttle_key(session_id));
        }
        drop(sessions);

        if report.skipped > 0 {
            crate::warn_throttled!(
                self.throttler,
                &throttle_key(session_id),
                "Event for session {} skipped by {} slow subscriber(s)",
                session_id,
                report.skipped
            );
        }
        trace!(
            "Event broadcast to session {}: {} delivered, {} pruned",
            session_id,
            report.delivered,
            report.pruned
        );
        report
    }

    pub fn broadcast_ball_update(&self, session_id: &str, balls: Vec<serde_json::Value>) -> BroadcastReport {
        self.broadcast(
            session_id,
            &TelemetryEvent::BallUpdate {
                timestamp_ms: now_ms(),
                balls,
            },
        )
    }

    pub fn broadcast_shot(&self, session_id: &str, shot: serde_json::Value) -> BroadcastReport {
        self.broadcast(
            session_id,
            &TelemetryEvent::Shot {
                timestamp_ms: now_ms(),
                shot,
            },
        )
    }

    pub fn broadcast_pocket(&self, session_id: &str, ball: &str, pocket: &str) -> BroadcastReport {
        self.broadcast(
            session_id,
            &TelemetryEvent::Pocket {
                timestamp_ms: now_ms(),
                ball: ball.to_string(),
                pocket: pocket.to_string(),
            },
        )
    }

    pub fn broadcast_foul(
        &self,
        session_id: &str,
        foul_type: &str,
        details: serde_json::Value,
    ) -> BroadcastReport {
        self.broadcast(
            session_id,
            &TelemetryEvent::Foul {
                timestamp_ms: now_ms(),
                foul_type: foul_type.to_string(),
                details,
            },
        )
    }

    pub fn broadcast_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        message: Option<String>,
    ) -> BroadcastReport {
        self.broadcast(
            session_id,
            &TelemetryEvent::Status {
                timestamp_ms: now_ms(),
                status,
                message,
            },
        )
    }

    pub fn broadcast_event(
        &self,
        session_id: &str,
        event_type: &str,
        data: serde_json::Value,
    ) -> BroadcastReport {
        self.broadcast(
            session_id,
            &GenericEvent {
                event_type: event_type.to_string(),
                timestamp_ms: now_ms(),
                data,
            },
        )
    }

    /// Persist an event, then push it to live subscribers
    pub async fn store_and_broadcast(
        &self,
        log: &dyn EventLog,
        session_id: &str,
        event_type: &str,
        data: serde_json::Value,
        timestamp_ms: Option<i64>,
    ) -> Result<BroadcastReport> {
        let timestamp_ms = timestamp_ms.unwrap_or_else(now_ms);
        log.append(TelemetryRecord {
            session_id: session_id.to_string(),
            timestamp_ms,
            event_type: event_type.to_string(),
            event_data: data.clone(),
        })
        .await?;

        Ok(self.broadcast(
            session_id,
            &GenericEvent {
                event_type: event_type.to_string(),
                timestamp_ms,
                data,
            },
        ))
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryStore;
    use crate::stream::broadcast::testing::MockSink;
    use crate::stream::SendError;

    #[test]
    fn test_broadcast_without_subscribers_is_noop() {
        let hub = EventHub::new();
        let report = hub.broadcast_shot("nobody", serde_json::json!({}));
        assert_eq!(report, BroadcastReport::default());
        assert_eq!(hub.session_count(), 0);
    }

    #[test]
    fn test_slow_subscriber_log_state_cleared_on_leave() {
        let hub = EventHub::new();
        let slow = MockSink::failing(SendError::Full);
        hub.subscribe("S", slow.clone());

        assert_eq!(hub.broadcast_shot("S", serde_json::json!({})).skipped, 1);
        assert_eq!(hub.throttler.len(), 1);

        hub.unsubscribe("S", &slow.id());
        assert_eq!(hub.session_count(), 0);
        assert!(hub.throttler.is_empty());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let hub = EventHub::new();
        let a = MockSink::live();
        let b = MockSink::live();
        hub.subscribe("A", a.clone());
        hub.subscribe("B", b.clone());

        hub.broadcast_pocket("A", "8", "corner");

        assert_eq!(a.texts().len(), 1);
        assert!(b.texts().is_empty());
        let json: serde_json::Value = serde_json::from_str(&a.texts()[0]).unwrap();
        assert_eq!(json["type"], "pocket");
        assert_eq!(json["ball"], "8");
    }

    #[test]
    fn test_dead_subscribers_pruned_and_entry_collected() {
        let hub = EventHub::new();
        let live = MockSink::live();
        let dead = MockSink::dead();
        hub.subscribe("S", live.clone());
        hub.subscribe("S", dead.clone());
        assert_eq!(hub.subscriber_count("S"), 2);

        let report = hub.broadcast_status("S", SessionStatus::Recording, None);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, 1);
        assert_eq!(hub.subscriber_count("S"), 1);
        assert_eq!(live.texts().len(), 1);

        hub.unsubscribe("S", &live.id());
        hub.unsubscribe("S", &live.id());
        assert_eq!(hub.session_count(), 0);

        // A set made only of dead members disappears after one pass
        hub.subscribe("T", MockSink::dead());
        hub.broadcast_foul("T", "scratch", serde_json::json!({}));
        assert_eq!(hub.session_count(), 0);
    }

    #[tokio::test]
    async fn test_store_and_broadcast() {
        let hub = EventHub::new();
        let store = MemoryStore::new();
        let sink = MockSink::live();
        hub.subscribe("S", sink.clone());

        let report = hub
            .store_and_broadcast(&store, "S", "break", serde_json::json!({"balls": 3}), Some(1234))
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        let events = store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp_ms, 1234);

        let json: serde_json::Value = serde_json::from_str(&sink.texts()[0]).unwrap();
        assert_eq!(json["type"], "break");
        assert_eq!(json["timestamp_ms"], 1234);
        assert_eq!(json["data"]["balls"], 3);
    }
}
