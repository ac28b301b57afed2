//! Frame types shared by every pipeline stage.

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use crate::camera::types::{PixelFormat, Resolution};

/// One RGBA8 pixel, layout-compatible with the raw byte buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Channels as floats in 0.0..=1.0.
    pub fn to_unit(self) -> [f32; 4] {
        [
            f32::from(self.r) / 255.0,
            f32::from(self.g) / 255.0,
            f32::from(self.b) / 255.0,
            f32::from(self.a) / 255.0,
        ]
    }

    pub fn from_unit(c: [f32; 4]) -> Self {
        Self {
            r: unit_to_u8(c[0]),
            g: unit_to_u8(c[1]),
            b: unit_to_u8(c[2]),
            a: unit_to_u8(c[3]),
        }
    }

    /// BT.601 luma in 0.0..=1.0.
    pub fn luma(self) -> f32 {
        (0.299 * f32::from(self.r) + 0.587 * f32::from(self.g) + 0.114 * f32::from(self.b))
            / 255.0
    }
}

pub fn unit_to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame data is {actual} bytes, expected {expected} for {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("resize failed: {0}")]
    Resize(String),
}

/// A timestamped RGBA8 image moving through the pipeline.
///
/// Owned by whichever stage is processing it; stages hand it on by value.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    /// Presentation time in microseconds, monotonic within a session.
    pub timestamp_us: u64,
    /// Monotonic capture counter, survives frame drops.
    pub sequence: u64,
}

impl FrameBuffer {
    /// Wrap RGBA8 bytes; the length must be exactly `width * height * 4`.
    pub fn from_rgba(
        width: u32,
        height: u32,
        data: Vec<u8>,
        timestamp_us: u64,
    ) -> Result<Self, FrameError> {
        let expected = PixelFormat::Rgba8.frame_len(width, height);
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp_us,
            sequence: 0,
        })
    }

    /// A frame filled with one colour.
    pub fn solid(width: u32, height: u32, color: Rgba, timestamp_us: u64) -> Self {
        let pixels = vec![color; width as usize * height as usize];
        Self {
            data: bytemuck::cast_slice::<Rgba, u8>(&pixels).to_vec(),
            width,
            height,
            timestamp_us,
            sequence: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        PixelFormat::Rgba8
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn pixels(&self) -> &[Rgba] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn pixels_mut(&mut self) -> &mut [Rgba] {
        bytemuck::cast_slice_mut(&mut self.data)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba {
        self.pixels()[y as usize * self.width as usize + x as usize]
    }

    /// Bilinear sample at fractional pixel coordinates, clamped to the edges.
    pub fn sample_bilinear(&self, x: f32, y: f32) -> Rgba {
        let max_x = self.width.saturating_sub(1) as f32;
        let max_y = self.height.saturating_sub(1) as f32;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);
        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(self.width.saturating_sub(1));
        let y1 = (y0 + 1).min(self.height.saturating_sub(1));
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let p00 = self.pixel(x0, y0).to_unit();
        let p10 = self.pixel(x1, y0).to_unit();
        let p01 = self.pixel(x0, y1).to_unit();
        let p11 = self.pixel(x1, y1).to_unit();

        let mut out = [0.0f32; 4];
        for c in 0..4 {
            let top = p00[c] + (p10[c] - p00[c]) * fx;
            let bottom = p01[c] + (p11[c] - p01[c]) * fx;
            out[c] = top + (bottom - top) * fy;
        }
        Rgba::from_unit(out)
    }

    /// Resample to `target`, keeping the aspect ratio by centre-cropping,
    /// and magnify by `zoom` (values below 1.0 are treated as 1.0).
    pub fn resized(self, target: Resolution, zoom: f32) -> Result<Self, FrameError> {
        use fast_image_resize as fr;
        use fr::images::Image;

        let zoom = f64::from(if zoom.is_finite() { zoom.max(1.0) } else { 1.0 });
        if self.resolution() == target && zoom <= 1.0 {
            return Ok(self);
        }

        let Self {
            data,
            width,
            height,
            timestamp_us,
            sequence,
        } = self;
        let (w, h) = (f64::from(width), f64::from(height));
        let aspect = f64::from(target.width) / f64::from(target.height.max(1));
        let mut crop_w = w.min(h * aspect);
        let mut crop_h = crop_w / aspect;
        crop_w /= zoom;
        crop_h /= zoom;
        let left = (w - crop_w) / 2.0;
        let top = (h - crop_h) / 2.0;

        let src = Image::from_vec_u8(width, height, data, fr::PixelType::U8x4)
            .map_err(|e| FrameError::Resize(e.to_string()))?;
        let mut dst = Image::new(target.width, target.height, fr::PixelType::U8x4);
        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear))
            .crop(left, top, crop_w, crop_h);
        fr::Resizer::new()
            .resize(&src, &mut dst, &options)
            .map_err(|e| FrameError::Resize(e.to_string()))?;

        Ok(Self {
            data: dst.into_vec(),
            width: target.width,
            height: target.height,
            timestamp_us,
            sequence,
        })
    }

    /// Mean absolute per-channel difference against another frame of the
    /// same size, or `None` when sizes differ.
    pub fn mean_abs_diff(&self, other: &FrameBuffer) -> Option<f64> {
        if self.width != other.width || self.height != other.height {
            return None;
        }
        if self.data.is_empty() {
            return Some(0.0);
        }
        let total: u64 = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| u64::from(a.abs_diff(*b)))
            .sum();
        Some(total as f64 / self.data.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgba_rejects_wrong_length() {
        let err = FrameBuffer::from_rgba(2, 2, vec![0; 15], 0).unwrap_err();
        assert_eq!(
            err,
            FrameError::SizeMismatch {
                width: 2,
                height: 2,
                expected: 16,
                actual: 15
            }
        );
    }

    #[test]
    fn pixels_view_matches_bytes() {
        let frame = FrameBuffer::from_rgba(1, 2, vec![1, 2, 3, 4, 5, 6, 7, 8], 10).unwrap();
        assert_eq!(frame.pixels().len(), 2);
        assert_eq!(frame.pixel(0, 1), Rgba::new(5, 6, 7, 8));
        assert_eq!(frame.format(), PixelFormat::Rgba8);
    }

    #[test]
    fn pixels_mut_writes_through() {
        let mut frame = FrameBuffer::solid(2, 1, Rgba::opaque(0, 0, 0), 0);
        frame.pixels_mut()[1] = Rgba::opaque(9, 8, 7);
        assert_eq!(&frame.as_bytes()[4..8], &[9, 8, 7, 255]);
    }

    #[test]
    fn bilinear_sample_interpolates_between_pixels() {
        let mut frame = FrameBuffer::solid(2, 1, Rgba::opaque(0, 0, 0), 0);
        frame.pixels_mut()[1] = Rgba::opaque(200, 200, 200);
        let mid = frame.sample_bilinear(0.5, 0.0);
        assert_eq!(mid.r, 100);
        // Out-of-range coordinates clamp to the edge.
        assert_eq!(frame.sample_bilinear(-3.0, 5.0), Rgba::opaque(0, 0, 0));
    }

    #[test]
    fn mean_abs_diff_detects_changes() {
        let a = FrameBuffer::solid(4, 4, Rgba::opaque(10, 10, 10), 0);
        let b = FrameBuffer::solid(4, 4, Rgba::opaque(20, 10, 10), 0);
        let diff = a.mean_abs_diff(&b).unwrap();
        assert!((diff - 2.5).abs() < 1e-9, "got {diff}");
        assert_eq!(a.mean_abs_diff(&a), Some(0.0));
        assert!(a
            .mean_abs_diff(&FrameBuffer::solid(2, 2, Rgba::default(), 0))
            .is_none());
    }

    #[test]
    fn resized_scales_to_target() {
        let frame = FrameBuffer::solid(64, 48, Rgba::opaque(50, 100, 150), 7);
        let out = frame.resized(Resolution::new(32, 24), 1.0).unwrap();
        assert_eq!(out.resolution(), Resolution::new(32, 24));
        assert_eq!(out.timestamp_us, 7);
        assert_eq!(out.pixel(10, 10), Rgba::opaque(50, 100, 150));
    }

    #[test]
    fn resized_zoom_magnifies_the_centre() {
        // Left half black, right half white.
        let mut frame = FrameBuffer::solid(64, 64, Rgba::opaque(0, 0, 0), 0);
        for y in 0..64 {
            for x in 32..64 {
                frame.pixels_mut()[y * 64 + x] = Rgba::opaque(255, 255, 255);
            }
        }
        let zoomed = frame.resized(Resolution::new(64, 64), 4.0).unwrap();
        // The crop spans x 24..40, so the edge moves out towards the frame sides.
        assert_eq!(zoomed.pixel(4, 32).r, 0);
        assert_eq!(zoomed.pixel(60, 32).r, 255);
    }

    #[test]
    fn resized_is_identity_without_zoom_or_size_change() {
        let frame = FrameBuffer::solid(8, 8, Rgba::opaque(1, 2, 3), 0);
        let same = frame.clone().resized(Resolution::new(8, 8), 1.0).unwrap();
        assert_eq!(same, frame);
    }

    #[test]
    fn luma_of_white_is_one() {
        assert!((Rgba::opaque(255, 255, 255).luma() - 1.0).abs() < 1e-3);
    }
}
