use std::path::Path;

use crate::effects::effect::{EffectKind, FrameEffect};
use crate::effects::error::{EffectError, Result};
use crate::effects::FrameContext;
use crate::frame::{FrameBuffer, Rgba};
use crate::tracker::types::{FaceRect, Landmark};

const BUILTIN_WIDTH: u32 = 160;
const BUILTIN_HEIGHT: u32 = 208;
/// Largest mask kept in memory; bigger images are downscaled on load.
const MAX_MASK_PIXELS: usize = 1024 * 1024;

/// Alpha-composites an RGBA image over each face, or over the whole frame
/// when no face is known.
pub struct OverlayMaskEffect {
    mask: FrameBuffer,
    track_face: bool,
    requires_landmarks: bool,
}

impl OverlayMaskEffect {
    /// Decode a PNG or JPEG mask.
    pub fn load(path: &Path) -> Result<Self> {
        let asset_error = |reason: String| EffectError::Asset {
            path: path.to_path_buf(),
            reason,
        };
        let image = image::open(path).map_err(|e| asset_error(e.to_string()))?;
        let mut rgba = image.to_rgba8();
        let pixels = rgba.width() as usize * rgba.height() as usize;
        if pixels == 0 {
            return Err(asset_error("mask image is empty".to_string()));
        }
        if pixels > MAX_MASK_PIXELS {
            let scale = (MAX_MASK_PIXELS as f64 / pixels as f64).sqrt();
            let w = ((f64::from(rgba.width()) * scale) as u32).max(1);
            let h = ((f64::from(rgba.height()) * scale) as u32).max(1);
            rgba = image::imageops::resize(&rgba, w, h, image::imageops::FilterType::Triangle);
        }
        let (w, h) = rgba.dimensions();
        let mask = FrameBuffer::from_rgba(w, h, rgba.into_raw(), 0)
            .map_err(|e| asset_error(e.to_string()))?;
        tracing::debug!(path = %path.display(), width = w, height = h, "loaded overlay mask");
        Ok(Self::from_mask(mask))
    }

    /// Procedural sunglasses, laid out for a face bounding box.
    pub fn builtin() -> Self {
        let mut mask = FrameBuffer::solid(BUILTIN_WIDTH, BUILTIN_HEIGHT, Rgba::new(0, 0, 0, 0), 0);
        let (w, h) = (BUILTIN_WIDTH as f32, BUILTIN_HEIGHT as f32);
        let lens_y = h * 0.40;
        let lenses = [(w * 0.30, lens_y), (w * 0.70, lens_y)];
        let (rx, ry) = (w * 0.17, h * 0.09);
        let rim = Rgba::new(20, 20, 24, 255);
        let glass = Rgba::new(30, 40, 60, 215);

        let width = mask.width();
        for (i, px) in mask.pixels_mut().iter_mut().enumerate() {
            let x = (i as u32 % width) as f32 + 0.5;
            let y = (i as u32 / width) as f32 + 0.5;
            for (cx, cy) in lenses {
                let d = ((x - cx) / rx).powi(2) + ((y - cy) / ry).powi(2);
                if d <= 0.75 {
                    *px = glass;
                } else if d <= 1.0 {
                    *px = rim;
                }
            }
            let bridge = x > w * 0.45 && x < w * 0.55 && (y - (lens_y - ry * 0.4)).abs() < 2.5;
            if bridge {
                *px = rim;
            }
        }
        Self::from_mask(mask)
    }

    fn from_mask(mask: FrameBuffer) -> Self {
        Self {
            mask,
            track_face: true,
            requires_landmarks: false,
        }
    }

    pub fn track_face(mut self, track: bool) -> Self {
        self.track_face = track;
        self
    }

    pub fn requiring_landmarks(mut self, requires: bool) -> Self {
        self.requires_landmarks = requires;
        self
    }

    /// Where the mask goes for one face: the face box widened a little and
    /// centred on the eyes horizontally.
    fn face_anchor(bounds: FaceRect, eye_mid_x: f32) -> FaceRect {
        let grown = bounds.expanded(0.08);
        FaceRect {
            x: eye_mid_x - grown.width / 2.0,
            ..grown
        }
    }

    fn composite(&self, frame: &mut FrameBuffer, dest: FaceRect) {
        if dest.width < 1.0 || dest.height < 1.0 {
            return;
        }
        let (fw, fh) = (frame.width(), frame.height());
        let x0 = dest.x.max(0.0).floor() as u32;
        let y0 = dest.y.max(0.0).floor() as u32;
        let x1 = ((dest.x + dest.width).ceil().max(0.0) as u32).min(fw);
        let y1 = ((dest.y + dest.height).ceil().max(0.0) as u32).min(fh);
        let sx = self.mask.width() as f32 / dest.width;
        let sy = self.mask.height() as f32 / dest.height;

        let pixels = frame.pixels_mut();
        for y in y0..y1 {
            for x in x0..x1 {
                let mx = (x as f32 + 0.5 - dest.x) * sx - 0.5;
                let my = (y as f32 + 0.5 - dest.y) * sy - 0.5;
                let m = self.mask.sample_bilinear(mx, my);
                if m.a == 0 {
                    continue;
                }
                let alpha = f32::from(m.a) / 255.0;
                let out = &mut pixels[y as usize * fw as usize + x as usize];
                let over = |dst: u8, src: u8| {
                    (f32::from(dst) + (f32::from(src) - f32::from(dst)) * alpha + 0.5) as u8
                };
                out.r = over(out.r, m.r);
                out.g = over(out.g, m.g);
                out.b = over(out.b, m.b);
            }
        }
    }
}

impl FrameEffect for OverlayMaskEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::OverlayMask
    }

    fn requires_landmarks(&self) -> bool {
        self.requires_landmarks
    }

    fn apply(&self, frame: &mut FrameBuffer, ctx: &FrameContext<'_>) {
        let faces = ctx
            .landmarks
            .filter(|set| self.track_face && !set.is_empty())
            .map(|set| set.faces.as_slice());

        match faces {
            Some(faces) => {
                for face in faces {
                    let eyes = face
                        .point(Landmark::LeftEye)
                        .midpoint(face.point(Landmark::RightEye));
                    self.composite(frame, Self::face_anchor(face.bounds, eyes.x));
                }
            }
            None => {
                let full = FaceRect {
                    x: 0.0,
                    y: 0.0,
                    width: frame.width() as f32,
                    height: frame.height() as f32,
                };
                self.composite(frame, full);
            }
        }
    }
}
