//! Source locator grammar
//!
//! - `device:<index>` for a local capture device
//! - `<scheme>://<host>:<port>[/<path>]` with scheme `udp`, `rtsp`, `http`
//!   or `https` for network cameras

use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamScheme {
    Udp,
    Rtsp,
    Http,
    Https,
}

impl StreamScheme {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "udp" => Some(StreamScheme::Udp),
            "rtsp" => Some(StreamScheme::Rtsp),
            "http" => Some(StreamScheme::Http),
            "https" => Some(StreamScheme::Https),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamScheme::Udp => "udp",
            StreamScheme::Rtsp => "rtsp",
            StreamScheme::Http => "http",
            StreamScheme::Https => "https",
        }
    }
}

/// Where a capture adapter reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    Device(u32),
    Network { scheme: StreamScheme, url: String },
}

impl SourceLocator {
    /// Local device index, if this is a device locator
    pub fn device_index(&self) -> Option<u32> {
        match self {
            SourceLocator::Device(index) => Some(*index),
            SourceLocator::Network { .. } => None,
        }
    }

    /// Human-readable description used in error messages
    pub fn describe(&self) -> String {
        match self {
            SourceLocator::Device(index) => format!("camera device {}", index),
            SourceLocator::Network { url, .. } => format!("stream {}", url),
        }
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::Device(index) => write!(f, "device:{}", index),
            SourceLocator::Network { url, .. } => f.write_str(url),
        }
    }
}

impl FromStr for SourceLocator {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || AppError::BadRequest(format!("Unrecognized source locator: {:?}", s));

        if let Some(index) = s.strip_prefix("device:") {
            return index
                .trim()
                .parse::<u32>()
                .map(SourceLocator::Device)
                .map_err(|_| invalid());
        }

        let (scheme, rest) = s.split_once("://").ok_or_else(invalid)?;
        let scheme = StreamScheme::parse(scheme).ok_or_else(invalid)?;

        // host:port is required, the path is optional
        let authority = rest.split('/').next().unwrap_or("");
        let (host, port) = authority.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(invalid());
        }

        Ok(SourceLocator::Network {
            scheme,
            url: s.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device() {
        assert_eq!("device:0".parse::<SourceLocator>().unwrap(), SourceLocator::Device(0));
        assert_eq!(
            "device:12".parse::<SourceLocator>().unwrap().device_index(),
            Some(12)
        );
        assert!("device:".parse::<SourceLocator>().is_err());
        assert!("device:-1".parse::<SourceLocator>().is_err());
    }

    #[test]
    fn test_parse_network() {
        let loc: SourceLocator = "rtsp://10.5.5.9:554/live".parse().unwrap();
        assert!(matches!(
            loc,
            SourceLocator::Network {
                scheme: StreamScheme::Rtsp,
                ..
            }
        ));
        assert_eq!(loc.to_string(), "rtsp://10.5.5.9:554/live");

        assert!("udp://10.5.5.9:8554".parse::<SourceLocator>().is_ok());
        assert!("http://10.5.5.9:8080/live/amba.m3u8".parse::<SourceLocator>().is_ok());
    }

    #[test]
    fn test_reject_unknown_forms() {
        for bad in ["", "/dev/video0", "ftp://host:21/x", "rtsp://host/live", "rtsp://:554", "udp://h:port"] {
            assert!(bad.parse::<SourceLocator>().is_err(), "{bad} should be rejected");
        }
    }
}
