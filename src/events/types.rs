//! Telemetry notifications pushed to event subscribers
//!
//! Serialized with an internal `type` tag:
//! ```json
//! {"type": "pocket", "timestamp_ms": 1700000000000, "ball": "8", "pocket": "corner_tl"}
//! ```

use serde::{Deserialize, Serialize};

use crate::session::SessionStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// Ball positions and states
    BallUpdate {
        timestamp_ms: i64,
        balls: Vec<serde_json::Value>,
    },
    /// A shot was detected
    Shot {
        timestamp_ms: i64,
        shot: serde_json::Value,
    },
    /// A ball was pocketed
    Pocket {
        timestamp_ms: i64,
        ball: String,
        pocket: String,
    },
    Foul {
        timestamp_ms: i64,
        foul_type: String,
        details: serde_json::Value,
    },
    /// Session status change
    Status {
        timestamp_ms: i64,
        status: SessionStatus,
        message: Option<String>,
    },
}

impl TelemetryEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryEvent::BallUpdate { .. } => "ball_update",
            TelemetryEvent::Shot { .. } => "shot",
            TelemetryEvent::Pocket { .. } => "pocket",
            TelemetryEvent::Foul { .. } => "foul",
            TelemetryEvent::Status { .. } => "status",
        }
    }
}

/// Free-form game event, `{"type": <event_type>, "timestamp_ms", "data"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp_ms: i64,
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_serialization() {
        let event = TelemetryEvent::Status {
            timestamp_ms: 5,
            status: SessionStatus::Recording,
            message: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["status"], "recording");
        assert!(json["message"].is_null());
        assert_eq!(event.kind(), "status");

        let generic = GenericEvent {
            event_type: "break".into(),
            timestamp_ms: 9,
            data: serde_json::json!({"player": 1}),
        };
        let json = serde_json::to_value(&generic).unwrap();
        assert_eq!(json["type"], "break");
        assert_eq!(json["data"]["player"], 1);
    }
}
