//! JPEG encoder
//!
//! ```text
//! YUYV ──convert──> I420 ──turbojpeg──> JPEG
//! JPEG ──turbojpeg──> RGB ──turbojpeg──> JPEG (at the configured quality)
//! ```
//!
//! Not thread-safe; each capture adapter owns its own encoder.

use bytes::Bytes;
use turbojpeg::{Compressor, Decompressor, Image, PixelFormat as TJPixelFormat, Subsamp, YuvImage};

use crate::error::{AppError, Result};
use crate::video::convert::Yuv420pBuffer;
use crate::video::format::Resolution;

pub struct JpegEncoder {
    quality: u8,
    compressor: Compressor,
    decompressor: Decompressor,
    i420: Option<Yuv420pBuffer>,
}

impl JpegEncoder {
    pub fn new(quality: u8) -> Result<Self> {
        let mut compressor = Compressor::new()
            .map_err(|e| AppError::VideoError(format!("Failed to create turbojpeg compressor: {}", e)))?;
        compressor
            .set_quality(quality.clamp(1, 100) as i32)
            .map_err(|e| AppError::VideoError(format!("Failed to set JPEG quality: {}", e)))?;
        compressor
            .set_subsamp(Subsamp::Sub2x2)
            .map_err(|e| AppError::VideoError(format!("Failed to set JPEG subsampling: {}", e)))?;

        let decompressor = Decompressor::new()
            .map_err(|e| AppError::VideoError(format!("Failed to create turbojpeg decoder: {}", e)))?;

        Ok(Self {
            quality,
            compressor,
            decompressor,
            i420: None,
        })
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode a packed YUYV frame
    pub fn encode_yuyv(&mut self, data: &[u8], resolution: Resolution) -> Result<Bytes> {
        if self.i420.as_ref().map(Yuv420pBuffer::resolution) != Some(resolution) {
            self.i420 = Some(Yuv420pBuffer::new(resolution));
        }
        let buffer = self
            .i420
            .get_or_insert_with(|| Yuv420pBuffer::new(resolution));
        buffer.fill_from_yuyv(data)?;

        let image = YuvImage {
            pixels: buffer.as_bytes(),
            width: resolution.width as usize,
            align: 1,
            height: resolution.height as usize,
            subsamp: Subsamp::Sub2x2,
        };

        let jpeg = self
            .compressor
            .compress_yuv_to_vec(image)
            .map_err(|e| AppError::VideoError(format!("JPEG compression failed: {}", e)))?;
        Ok(Bytes::from(jpeg))
    }

    /// Decode a JPEG/MJPEG frame and compress it again at our quality
    pub fn reencode_jpeg(&mut self, data: &[u8]) -> Result<Bytes> {
        let header = self
            .decompressor
            .read_header(data)
            .map_err(|e| AppError::VideoError(format!("turbojpeg read_header failed: {}", e)))?;

        let pitch = header.width * 3;
        let mut image = Image {
            pixels: vec![0u8; header.height * pitch],
            width: header.width,
            pitch,
            height: header.height,
            format: TJPixelFormat::RGB,
        };

        self.decompressor
            .decompress(data, image.as_deref_mut())
            .map_err(|e| AppError::VideoError(format!("turbojpeg decode failed: {}", e)))?;

        let jpeg = self
            .compressor
            .compress_to_vec(image.as_deref())
            .map_err(|e| AppError::VideoError(format!("JPEG compression failed: {}", e)))?;
        Ok(Bytes::from(jpeg))
    }
}
