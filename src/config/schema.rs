use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP/WebSocket listener settings
    pub server: ServerConfig,
    /// Token verification settings
    pub auth: AuthConfig,
    /// Session metadata store
    pub database: DatabaseConfig,
    /// Capture and pacing settings
    pub video: VideoConfig,
    /// Producer/consumer relay settings
    pub relay: RelayConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind_address: String,
    /// Listen port
    pub port: u16,
    /// Origins allowed by CORS (empty = any)
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret shared with the token issuer
    pub secret_key: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: "change-me-in-production".to_string(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    pub url: String,
    /// Maximum pool connections
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/pool_telemetry.db?mode=rwc".to_string(),
            max_connections: 4,
        }
    }
}

/// Video capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    /// Resolution used when a session does not declare one
    pub default_resolution: String,
    /// Frame rate used when a session does not declare one
    pub default_framerate: u32,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Maximum concurrent blocking capture jobs
    pub worker_threads: usize,
    /// Upper bound on a single frame read, in milliseconds
    pub read_timeout_ms: u64,
    /// How long a network source may warm up before it counts as failed, in milliseconds
    pub probe_window_ms: u64,
    /// ffmpeg binary used for network sources and the generic device fallback
    pub ffmpeg_path: String,
    /// Consecutive read failures before a session is declared unrecoverable (unset = never)
    pub max_consecutive_read_failures: Option<u32>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            default_resolution: "1080p".to_string(),
            default_framerate: 30,
            jpeg_quality: 80,
            worker_threads: 4,
            read_timeout_ms: 2000,
            probe_window_ms: 1500,
            ffmpeg_path: "ffmpeg".to_string(),
            max_consecutive_read_failures: None,
        }
    }
}

impl VideoConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn probe_window(&self) -> Duration {
        Duration::from_millis(self.probe_window_ms)
    }
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Grace window for the role declaration, in seconds
    pub role_timeout_secs: u64,
    /// Per-connection outbound queue capacity (messages)
    pub outbound_queue: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            role_timeout_secs: 10,
            outbound_queue: 64,
        }
    }
}

impl RelayConfig {
    pub fn role_timeout(&self) -> Duration {
        Duration::from_secs(self.role_timeout_secs)
    }
}
