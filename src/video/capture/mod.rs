//! Capture adapters
//!
//! A [`CaptureAdapter`] owns one native source and yields JPEG frames on
//! demand. Every method blocks; callers run them through
//! [`BlockingPool`](crate::video::pool::BlockingPool).
//!
//! Opening walks an ordered list of strategies:
//!
//! ```text
//! device:N      V4L2 MJPEG ─> V4L2 YUYV ─> ffmpeg v4l2 demuxer
//! scheme://...  ffmpeg low-latency input ─> ffmpeg defaults
//! ```

mod ffmpeg;
mod v4l2;

pub use ffmpeg::{extract_jpeg, FfmpegAdapter, FfmpegInput};
pub use v4l2::V4l2Adapter;

use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::VideoConfig;
use crate::error::{AppError, Result};
use crate::video::format::{PixelFormat, Resolution};
use crate::video::frame::is_jpeg;
use crate::video::locator::SourceLocator;

/// Everything an adapter needs besides the locator
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Resolution label as configured on the session (e.g. `720p`)
    pub label: String,
    pub resolution: Resolution,
    pub framerate: u32,
    pub jpeg_quality: u8,
    pub read_timeout: Duration,
    pub probe_window: Duration,
    pub ffmpeg_path: String,
}

impl CaptureSettings {
    pub fn from_config(config: &VideoConfig, resolution: &str, framerate: u32) -> Self {
        Self {
            label: resolution.to_string(),
            resolution: Resolution::from_label(resolution),
            framerate: if framerate == 0 {
                config.default_framerate.max(1)
            } else {
                framerate
            },
            jpeg_quality: config.jpeg_quality,
            read_timeout: config.read_timeout(),
            probe_window: config.probe_window(),
            ffmpeg_path: config.ffmpeg_path.clone(),
        }
    }
}

/// An open video source
pub trait CaptureAdapter: Send {
    /// Block until the next frame is available and return it as JPEG
    fn read_frame(&mut self) -> Result<Bytes>;

    /// Release the native handle; later reads fail
    fn close(&mut self);

    /// Short backend description for logs
    fn backend(&self) -> &str;
}

/// Opens adapters for locators
pub trait CaptureBackend: Send + Sync {
    fn open(&self, locator: &SourceLocator, settings: &CaptureSettings) -> Result<Box<dyn CaptureAdapter>>;
}

/// Open through `backend`, then do one diagnostic read
///
/// A failed first read is only logged: network sources often need a few
/// seconds before the first decodable frame.
pub fn open_with_diagnostic(
    backend: &dyn CaptureBackend,
    locator: &SourceLocator,
    settings: &CaptureSettings,
) -> Result<Box<dyn CaptureAdapter>> {
    let mut adapter = backend.open(locator, settings)?;

    match adapter.read_frame() {
        Ok(frame) if is_jpeg(&frame) => info!(
            "Diagnostic read from {} via {}: {} bytes",
            locator,
            adapter.backend(),
            frame.len()
        ),
        Ok(frame) => warn!(
            "Diagnostic read from {} returned {} bytes without a JPEG header",
            locator,
            frame.len()
        ),
        Err(e) => warn!("Diagnostic read from {} failed: {}", locator, e),
    }

    Ok(adapter)
}

/// One way of opening a source
#[derive(Debug, Clone, PartialEq)]
enum Strategy {
    V4l2(PixelFormat),
    Ffmpeg(FfmpegInput),
}

impl Strategy {
    fn plan(locator: &SourceLocator) -> Vec<Strategy> {
        match locator {
            SourceLocator::Device(index) => vec![
                Strategy::V4l2(PixelFormat::Mjpeg),
                Strategy::V4l2(PixelFormat::Yuyv),
                Strategy::Ffmpeg(FfmpegInput::Device(*index)),
            ],
            SourceLocator::Network { scheme, url } => vec![
                Strategy::Ffmpeg(FfmpegInput::Network {
                    scheme: *scheme,
                    url: url.clone(),
                    low_latency: true,
                }),
                Strategy::Ffmpeg(FfmpegInput::Network {
                    scheme: *scheme,
                    url: url.clone(),
                    low_latency: false,
                }),
            ],
        }
    }

    fn open(&self, locator: &SourceLocator, settings: &CaptureSettings) -> Result<Box<dyn CaptureAdapter>> {
        match self {
            Strategy::V4l2(format) => {
                let index = locator.device_index().ok_or_else(|| {
                    AppError::Internal("V4L2 strategy needs a device locator".to_string())
                })?;
                Ok(Box::new(V4l2Adapter::open(index, *format, settings)?))
            }
            Strategy::Ffmpeg(input) => Ok(Box::new(FfmpegAdapter::open(input.clone(), settings)?)),
        }
    }
}

/// Production backend: V4L2 devices and ffmpeg-decoded streams
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCaptureBackend;

impl CaptureBackend for SystemCaptureBackend {
    fn open(&self, locator: &SourceLocator, settings: &CaptureSettings) -> Result<Box<dyn CaptureAdapter>> {
        info!(
            "Opening {} at {} @ {} fps",
            locator, settings.resolution, settings.framerate
        );

        let mut failures = Vec::new();
        for strategy in Strategy::plan(locator) {
            match strategy.open(locator, settings) {
                Ok(adapter) => {
                    info!("Opened {} via {}", locator, adapter.backend());
                    return Ok(adapter);
                }
                Err(e) => {
                    debug!("Strategy {:?} failed for {}: {}", strategy, locator, e);
                    failures.push(e.to_string());
                }
            }
        }

        warn!("Failed to open {} with any backend", locator);
        Err(AppError::DeviceOpen {
            locator: locator.to_string(),
            reason: failures.join("; "),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{MockBackend, Step};
    use super::*;
    use crate::video::locator::StreamScheme;

    fn settings() -> CaptureSettings {
        CaptureSettings::from_config(&VideoConfig::default(), "1080p", 30)
    }

    #[test]
    fn test_device_plan_order() {
        let plan = Strategy::plan(&SourceLocator::Device(0));
        assert_eq!(
            plan,
            vec![
                Strategy::V4l2(PixelFormat::Mjpeg),
                Strategy::V4l2(PixelFormat::Yuyv),
                Strategy::Ffmpeg(FfmpegInput::Device(0)),
            ]
        );
    }

    #[test]
    fn test_network_plan_prefers_low_latency() {
        let locator: SourceLocator = "udp://10.5.5.9:8554".parse().unwrap();
        let plan = Strategy::plan(&locator);
        assert_eq!(plan.len(), 2);
        assert!(matches!(
            &plan[0],
            Strategy::Ffmpeg(FfmpegInput::Network {
                scheme: StreamScheme::Udp,
                low_latency: true,
                ..
            })
        ));
    }

    #[test]
    fn test_diagnostic_failure_does_not_fail_open() {
        let backend = MockBackend::new(vec![Step::Frame]);
        let mut adapter =
            open_with_diagnostic(&backend, &SourceLocator::Device(0), &settings()).unwrap();
        assert!(is_jpeg(&adapter.read_frame().unwrap()));
    }

    #[test]
    fn test_settings_defaults() {
        let s = CaptureSettings::from_config(&VideoConfig::default(), "bogus", 0);
        assert_eq!(s.resolution, Resolution::HD1080);
        assert_eq!(s.label, "bogus");
        assert_eq!(s.framerate, 30);
        assert_eq!(s.jpeg_quality, 80);
    }
}
