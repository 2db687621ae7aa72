//! poolcam - live video for pool-telemetry recording sessions
//!
//! Captures frames from local cameras and network streams, relays frames
//! pushed by phones to desktop viewers, and fans out telemetry events to
//! live subscribers over WebSockets.

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod relay;
pub mod session;
pub mod state;
pub mod stream;
pub mod utils;
pub mod video;
pub mod web;

pub use error::{AppError, Result};
