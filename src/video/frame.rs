//! Encoded frame passed from an adapter to a viewer

use base64::Engine;
use bytes::Bytes;

use crate::utils::now_ms;

/// One JPEG image with its capture time; never persisted
#[derive(Debug, Clone)]
pub struct Frame {
    data: Bytes,
    timestamp_ms: i64,
}

impl Frame {
    pub fn new(data: Bytes, timestamp_ms: i64) -> Self {
        Self { data, timestamp_ms }
    }

    /// Frame stamped with the current time
    pub fn now(data: Bytes) -> Self {
        Self::new(data, now_ms())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    /// Payload in the text form carried by `frame` messages
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}

/// Whether `data` starts with a JPEG SOI marker
pub fn is_jpeg(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_payload() {
        let frame = Frame::new(Bytes::from_static(&[0xFF, 0xD8, 0xFF]), 7);
        assert_eq!(frame.to_base64(), "/9j/");
        assert_eq!(frame.timestamp_ms(), 7);
        assert!(is_jpeg(frame.data()));
        assert!(!is_jpeg(&[0xFF]));
    }
}
