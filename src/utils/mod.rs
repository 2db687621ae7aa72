//! Shared helpers

pub mod throttle;

pub use throttle::LogThrottler;

/// Milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// RFC 3339 wall-clock timestamp
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
