//! V4L2 capture using memory-mapped buffers

use bytes::Bytes;
use tracing::{debug, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Format};

use super::{CaptureAdapter, CaptureSettings};
use crate::error::{AppError, Result};
use crate::video::encoder::JpegEncoder;
use crate::video::format::{PixelFormat, Resolution};

/// Two buffers keep latency at roughly one frame
const BUFFER_COUNT: u32 = 2;
/// Anything smaller is a truncated or empty buffer
const MIN_FRAME_SIZE: usize = 128;

pub struct V4l2Adapter {
    index: u32,
    format: PixelFormat,
    resolution: Resolution,
    stream: Option<MmapStream<'static>>,
    // Held for the lifetime of the stream
    _device: Device,
    encoder: JpegEncoder,
    label: String,
}

impl V4l2Adapter {
    pub fn open(index: u32, format: PixelFormat, settings: &CaptureSettings) -> Result<Self> {
        let open_err = |reason: String| AppError::DeviceOpen {
            locator: format!("device:{}", index),
            reason,
        };

        let device = Device::new(index as usize)
            .map_err(|e| open_err(format!("V4L2 open failed: {}", e)))?;

        let requested = Format::new(
            settings.resolution.width,
            settings.resolution.height,
            format.to_fourcc(),
        );
        let actual = device
            .set_format(&requested)
            .map_err(|e| open_err(format!("Failed to set {} format: {}", format, e)))?;

        if PixelFormat::from_fourcc(actual.fourcc) != Some(format) {
            return Err(open_err(format!(
                "{} not supported (driver chose {})",
                format, actual.fourcc
            )));
        }

        let resolution = Resolution::new(actual.width, actual.height);
        if resolution != settings.resolution {
            warn!(
                "Device {}: requested {}, got {}",
                index, settings.resolution, resolution
            );
        }

        if let Err(e) = device.set_params(&Parameters::with_fps(settings.framerate)) {
            warn!("Device {}: failed to set {} fps: {}", index, settings.framerate, e);
        }

        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| open_err(format!("Failed to map buffers: {}", e)))?;
        stream.set_timeout(settings.read_timeout);

        let encoder = JpegEncoder::new(settings.jpeg_quality)?;
        debug!("Device {} streaming {} at {}", index, format, resolution);

        Ok(Self {
            index,
            format,
            resolution,
            stream: Some(stream),
            _device: device,
            encoder,
            label: format!("v4l2/{}", format),
        })
    }
}

impl CaptureAdapter for V4l2Adapter {
    fn read_frame(&mut self) -> Result<Bytes> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| AppError::TransientRead(format!("device {} is closed", self.index)))?;

        let (buf, meta) = CaptureStream::next(stream)
            .map_err(|e| AppError::TransientRead(format!("device {}: {}", self.index, e)))?;

        let used = (meta.bytesused as usize).min(buf.len());
        let data = &buf[..used];
        if data.len() < MIN_FRAME_SIZE {
            return Err(AppError::TransientRead(format!(
                "device {}: short frame ({} bytes)",
                self.index,
                data.len()
            )));
        }

        let encoded = match self.format {
            PixelFormat::Mjpeg | PixelFormat::Jpeg => self.encoder.reencode_jpeg(data),
            PixelFormat::Yuyv => self.encoder.encode_yuyv(data, self.resolution),
        };
        encoded.map_err(|e| AppError::TransientRead(e.to_string()))
    }

    fn close(&mut self) {
        // Dropping the stream stops streaming and unmaps the buffers
        if self.stream.take().is_some() {
            debug!("Device {} closed", self.index);
        }
    }

    fn backend(&self) -> &str {
        &self.label
    }
}

impl Drop for V4l2Adapter {
    fn drop(&mut self) {
        self.close();
    }
}
