//! Session metadata and the capabilities the live path consumes
//!
//! Sessions are owned by an external metadata store. The live path only
//! reads descriptors (scoped to the authenticated principal), writes
//! status transitions and appends telemetry records.

mod memory;
mod status;
mod store;

pub use memory::MemoryStore;
pub use status::StatusReporter;
pub use store::SqliteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// How a session's video reaches the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Local capture device, paced by the server
    UsbDevice,
    /// Network camera stream, paced by the server
    NetworkStream,
    /// Frames pushed by a producer connection and relayed to consumers
    MobileRelay,
    /// Anything the live path cannot serve (e.g. recorded files)
    Unsupported,
}

impl SourceKind {
    /// Map a stored `source_type` value, accepting legacy names
    pub fn from_source_type(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "usb_device" | "gopro_usb" | "usb" | "webcam" => SourceKind::UsbDevice,
            "network_stream" | "gopro_wifi" | "network" => SourceKind::NetworkStream,
            "mobile_relay" | "mobile" => SourceKind::MobileRelay,
            _ => SourceKind::Unsupported,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::UsbDevice => "usb_device",
            SourceKind::NetworkStream => "network_stream",
            SourceKind::MobileRelay => "mobile_relay",
            SourceKind::Unsupported => "unsupported",
        }
    }

    /// Whether the server drives a capture adapter for this kind
    pub fn is_captured(&self) -> bool {
        matches!(self, SourceKind::UsbDevice | SourceKind::NetworkStream)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Recording,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Recording => "recording",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        }
    }

    /// Parse a stored status; unknown values read as pending
    pub fn parse(value: &str) -> Self {
        match value {
            "recording" => SessionStatus::Recording,
            "completed" => SessionStatus::Completed,
            "error" => SessionStatus::Error,
            _ => SessionStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of a session as configured in the metadata store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub id: String,
    pub owner: Option<String>,
    pub source_kind: SourceKind,
    /// Device reference or stream URL; may be empty for relay sessions
    pub source_locator: String,
    /// Resolution label such as `1080p`; `None` uses the configured default
    pub resolution: Option<String>,
    /// Target framerate; `None` or 0 uses the configured default
    pub framerate: Option<u32>,
    pub status: SessionStatus,
}

impl SessionDescriptor {
    /// Resolution label, falling back to `default`
    pub fn resolution_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.resolution
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(default)
    }

    /// Framerate, falling back to `default` when unset or zero
    pub fn framerate_or(&self, default: u32) -> u32 {
        self.framerate.filter(|f| *f > 0).unwrap_or(default)
    }
}

/// One telemetry event to persist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub session_id: String,
    pub timestamp_ms: i64,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

/// Session lookup and status writes
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Find a session owned by `principal`; sessions of other principals
    /// read as absent
    async fn lookup(&self, session_id: &str, principal: &str) -> Result<Option<SessionDescriptor>>;

    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<()>;
}

/// Append-only telemetry sink
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, record: TelemetryRecord) -> Result<()>;
}
