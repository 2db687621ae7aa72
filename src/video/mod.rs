//! Video capture and pacing
//!
//! Capture adapters for local devices and network cameras, the
//! per-session capture registry and the single-viewer frame pacer.

pub mod capture;
pub mod convert;
pub mod encoder;
pub mod format;
pub mod frame;
pub mod locator;
pub mod pacer;
pub mod pool;
pub mod registry;

pub use capture::{CaptureAdapter, CaptureBackend, CaptureSettings, SystemCaptureBackend};
pub use convert::Yuv420pBuffer;
pub use encoder::JpegEncoder;
pub use format::{PixelFormat, Resolution};
pub use frame::Frame;
pub use locator::{SourceLocator, StreamScheme};
pub use pacer::{FramePacer, PacerState, StopReason};
pub use pool::BlockingPool;
pub use registry::{CaptureHandle, CaptureRegistry};
