// Effect compositor: colour filters, face-aware AR effects, and the stage
// that applies them to frames in a fixed order.

pub mod beautify;
pub mod compositor;
pub mod effect;
pub mod error;
pub mod filter;
pub mod lut;
pub mod overlay;
pub mod shader;
pub mod warp;

use crate::frame::FrameBuffer;
use crate::tracker::types::LandmarkSet;

/// Per-frame inputs shared by filters and effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameContext<'a> {
    /// Landmarks correlated with this frame, already scaled to its size.
    pub landmarks: Option<&'a LandmarkSet>,
    /// Frame presentation time in seconds.
    pub time_s: f32,
}

/// Mix `processed` back towards `original` so that `intensity` 0.0 yields
/// the original and 1.0 leaves `processed` untouched.
pub(crate) fn blend_with_original(processed: &mut FrameBuffer, original: &FrameBuffer, intensity: f32) {
    let t = intensity.clamp(0.0, 1.0);
    if t >= 1.0 || processed.resolution() != original.resolution() {
        return;
    }
    for (out, src) in processed.pixels_mut().iter_mut().zip(original.pixels()) {
        let mix = |a: u8, b: u8| (f32::from(a) + (f32::from(b) - f32::from(a)) * t + 0.5) as u8;
        out.r = mix(src.r, out.r);
        out.g = mix(src.g, out.g);
        out.b = mix(src.b, out.b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Rgba;

    #[test]
    fn blend_interpolates_colour_channels() {
        let original = FrameBuffer::solid(2, 2, Rgba::opaque(0, 100, 200), 0);
        let mut processed = FrameBuffer::solid(2, 2, Rgba::opaque(200, 100, 0), 0);
        blend_with_original(&mut processed, &original, 0.25);
        assert_eq!(processed.pixel(0, 0), Rgba::opaque(50, 100, 150));
    }

    #[test]
    fn full_intensity_keeps_processed_frame() {
        let original = FrameBuffer::solid(1, 1, Rgba::opaque(0, 0, 0), 0);
        let mut processed = FrameBuffer::solid(1, 1, Rgba::opaque(9, 9, 9), 0);
        blend_with_original(&mut processed, &original, 1.0);
        assert_eq!(processed.pixel(0, 0), Rgba::opaque(9, 9, 9));
    }
}
