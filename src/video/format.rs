//! Pixel formats and the resolution table

use serde::{Deserialize, Serialize};
use std::fmt;
use v4l::format::fourcc;

/// Formats a capture device can be negotiated into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// MJPEG compressed format (preferred, frames are already JPEG)
    Mjpeg,
    /// JPEG compressed format
    Jpeg,
    /// YUYV 4:2:2 packed format
    Yuyv,
}

impl PixelFormat {
    /// Convert to V4L2 FourCC
    pub fn to_fourcc(&self) -> fourcc::FourCC {
        match self {
            PixelFormat::Mjpeg => fourcc::FourCC::new(b"MJPG"),
            PixelFormat::Jpeg => fourcc::FourCC::new(b"JPEG"),
            PixelFormat::Yuyv => fourcc::FourCC::new(b"YUYV"),
        }
    }

    /// Try to convert from V4L2 FourCC
    pub fn from_fourcc(fourcc: fourcc::FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"MJPG" => Some(PixelFormat::Mjpeg),
            b"JPEG" => Some(PixelFormat::Jpeg),
            b"YUYV" => Some(PixelFormat::Yuyv),
            _ => None,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, PixelFormat::Mjpeg | PixelFormat::Jpeg)
    }

    /// Exact frame size for uncompressed formats
    pub fn frame_size(&self, resolution: Resolution) -> Option<usize> {
        match self {
            PixelFormat::Yuyv => Some(resolution.width as usize * resolution.height as usize * 2),
            PixelFormat::Mjpeg | PixelFormat::Jpeg => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Mjpeg => "MJPEG",
            PixelFormat::Jpeg => "JPEG",
            PixelFormat::Yuyv => "YUYV",
        };
        write!(f, "{}", name)
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
    pub const HD1080: Resolution = Resolution {
        width: 1920,
        height: 1080,
    };
    pub const R2_7K: Resolution = Resolution {
        width: 2704,
        height: 1520,
    };
    pub const UHD4K: Resolution = Resolution {
        width: 3840,
        height: 2160,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Resolve a session's resolution label; unknown labels give 1080p
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "720p" => Self::HD720,
            "1080p" => Self::HD1080,
            "2.7k" => Self::R2_7K,
            "4k" | "2160p" => Self::UHD4K,
            _ => Self::HD1080,
        }
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_table() {
        assert_eq!(Resolution::from_label("720p"), Resolution::new(1280, 720));
        assert_eq!(Resolution::from_label("4K"), Resolution::new(3840, 2160));
        assert_eq!(Resolution::from_label("2.7K"), Resolution::new(2704, 1520));
        assert_eq!(Resolution::from_label("8K"), Resolution::HD1080);
        assert_eq!(Resolution::from_label(""), Resolution::HD1080);
    }

    #[test]
    fn test_fourcc_round_trip() {
        for format in [PixelFormat::Mjpeg, PixelFormat::Jpeg, PixelFormat::Yuyv] {
            assert_eq!(PixelFormat::from_fourcc(format.to_fourcc()), Some(format));
        }
        assert_eq!(PixelFormat::Yuyv.frame_size(Resolution::new(4, 2)), Some(16));
        assert!(PixelFormat::Mjpeg.is_compressed());
    }
}
