//! Pixel format conversion
//!
//! YUYV (packed 4:2:2, as delivered by UVC cameras) to I420 (planar 4:2:0)
//! ahead of JPEG compression. Chroma is averaged over each pair of rows.

use crate::error::{AppError, Result};
use crate::video::format::Resolution;

/// I420 buffer with contiguous Y, U, V planes
pub struct Yuv420pBuffer {
    data: Vec<u8>,
    resolution: Resolution,
    u_offset: usize,
    v_offset: usize,
}

impl Yuv420pBuffer {
    pub fn new(resolution: Resolution) -> Self {
        let y_size = resolution.width as usize * resolution.height as usize;
        let uv_size = chroma_width(resolution) * chroma_height(resolution);

        Self {
            data: vec![0u8; y_size + uv_size * 2],
            resolution,
            u_offset: y_size,
            v_offset: y_size + uv_size,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn y_plane(&self) -> &[u8] {
        &self.data[..self.u_offset]
    }

    pub fn u_plane(&self) -> &[u8] {
        &self.data[self.u_offset..self.v_offset]
    }

    pub fn v_plane(&self) -> &[u8] {
        &self.data[self.v_offset..]
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Fill from a YUYV frame of the same resolution
    pub fn fill_from_yuyv(&mut self, yuyv: &[u8]) -> Result<()> {
        let width = self.resolution.width as usize;
        let height = self.resolution.height as usize;
        let expected = width * height * 2;

        if width % 2 != 0 {
            return Err(AppError::VideoError(format!(
                "YUYV width must be even, got {}",
                width
            )));
        }
        if yuyv.len() < expected {
            return Err(AppError::VideoError(format!(
                "YUYV data too small: {} < {}",
                yuyv.len(),
                expected
            )));
        }

        let cw = chroma_width(self.resolution);
        let (y_plane, chroma) = self.data.split_at_mut(self.u_offset);
        let (u_plane, v_plane) = chroma.split_at_mut(self.v_offset - self.u_offset);

        for row in 0..height {
            let src = &yuyv[row * width * 2..(row + 1) * width * 2];
            let dst = &mut y_plane[row * width..(row + 1) * width];
            for (i, y) in dst.iter_mut().enumerate() {
                *y = src[i * 2];
            }
        }

        for crow in 0..chroma_height(self.resolution) {
            let top = crow * 2;
            // Odd heights reuse the last row for the final chroma line
            let bottom = (top + 1).min(height - 1);
            let src_top = &yuyv[top * width * 2..(top + 1) * width * 2];
            let src_bottom = &yuyv[bottom * width * 2..(bottom + 1) * width * 2];

            for cx in 0..cw {
                let base = cx * 4;
                let u = (src_top[base + 1] as u16 + src_bottom[base + 1] as u16 + 1) / 2;
                let v = (src_top[base + 3] as u16 + src_bottom[base + 3] as u16 + 1) / 2;
                u_plane[crow * cw + cx] = u as u8;
                v_plane[crow * cw + cx] = v as u8;
            }
        }

        Ok(())
    }
}

fn chroma_width(resolution: Resolution) -> usize {
    (resolution.width as usize + 1) / 2
}

fn chroma_height(resolution: Resolution) -> usize {
    (resolution.height as usize + 1) / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_i420_planes() {
        // 2x2 frame: Y0 U Y1 V per row
        let yuyv = [10, 100, 20, 200, 30, 110, 40, 210];
        let mut buf = Yuv420pBuffer::new(Resolution::new(2, 2));
        buf.fill_from_yuyv(&yuyv).unwrap();

        assert_eq!(buf.y_plane(), &[10, 20, 30, 40]);
        assert_eq!(buf.u_plane(), &[105]);
        assert_eq!(buf.v_plane(), &[205]);
        assert_eq!(buf.as_bytes().len(), 6);
    }

    #[test]
    fn test_short_input_rejected() {
        let mut buf = Yuv420pBuffer::new(Resolution::new(4, 4));
        assert!(buf.fill_from_yuyv(&[0u8; 10]).is_err());
    }
}
