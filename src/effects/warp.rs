use crate::effects::effect::{EffectKind, FrameEffect};
use crate::effects::FrameContext;
use crate::frame::FrameBuffer;
use crate::tracker::types::{FaceLandmarks, Landmark, Point};

/// Geometric face reshaping: bigger eyes and a narrower jaw.
///
/// Implemented as an inverse map: every output pixel inside a face samples
/// the unmodified frame at a displaced position.
pub struct FaceWarpEffect {
    eye_enlarge: f32,
    face_slim: f32,
}

impl FaceWarpEffect {
    pub fn new(eye_enlarge: f32, face_slim: f32) -> Self {
        Self {
            eye_enlarge,
            face_slim,
        }
    }

    /// Radial magnification: pulls samples towards the eye centre, strongest
    /// at the centre and fading to nothing at `radius`.
    fn magnify(&self, p: Point, eye: Point, radius: f32) -> Point {
        let d = p.distance(eye);
        if d >= radius || radius <= 0.0 {
            return p;
        }
        let t = d / radius;
        let scale = 1.0 - self.eye_enlarge * 0.5 * (1.0 - t * t);
        Point::new(eye.x + (p.x - eye.x) * scale, eye.y + (p.y - eye.y) * scale)
    }

    fn warp_face(&self, out: &mut FrameBuffer, src: &FrameBuffer, face: &FaceLandmarks) {
        let region = face.bounds.expanded(0.12);
        let (fw, fh) = (out.width(), out.height());
        let x0 = region.x.max(0.0) as u32;
        let y0 = region.y.max(0.0) as u32;
        let x1 = ((region.x + region.width).max(0.0) as u32).min(fw);
        let y1 = ((region.y + region.height).max(0.0) as u32).min(fh);
        if x1 <= x0 || y1 <= y0 {
            return;
        }

        let left_eye = face.point(Landmark::LeftEye);
        let right_eye = face.point(Landmark::RightEye);
        let eye_radius = match face.eye_distance() {
            d if d > 1.0 => d * 0.45,
            _ => face.bounds.width * 0.2,
        };
        let center_x = face.bounds.center().x;
        let half_w = region.width / 2.0;
        let eye_y = left_eye.midpoint(right_eye).y;
        let bottom = region.y + region.height;

        let width = fw as usize;
        let pixels = out.pixels_mut();
        for y in y0..y1 {
            for x in x0..x1 {
                let p = Point::new(x as f32, y as f32);
                let mut q = p;
                if self.eye_enlarge > 0.0 {
                    q = self.magnify(q, left_eye, eye_radius);
                    q = self.magnify(q, right_eye, eye_radius);
                }
                if self.face_slim > 0.0 && q.y > eye_y && bottom > eye_y {
                    let down = ((q.y - eye_y) / (bottom - eye_y)).clamp(0.0, 1.0);
                    let dx = q.x - center_x;
                    let across = (dx.abs() / half_w).min(1.0);
                    // Zero at the region border so the warp stays continuous.
                    let push = self.face_slim * 0.5 * down * (1.0 - across * across);
                    q.x = center_x + dx * (1.0 + push);
                }
                if q != p {
                    pixels[y as usize * width + x as usize] = src.sample_bilinear(q.x, q.y);
                }
            }
        }
    }
}

impl FrameEffect for FaceWarpEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::FaceWarp
    }

    fn requires_landmarks(&self) -> bool {
        true
    }

    fn apply(&self, frame: &mut FrameBuffer, ctx: &FrameContext<'_>) {
        let Some(set) = ctx.landmarks.filter(|set| !set.is_empty()) else {
            return;
        };
        let src = frame.clone();
        for face in &set.faces {
            self.warp_face(frame, &src, face);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::types::Resolution;
    use crate::frame::Rgba;
    use crate::tracker::types::{FaceRect, LandmarkSet, LANDMARK_COUNT};

    fn face_set() -> LandmarkSet {
        let bounds = FaceRect {
            x: 30.0,
            y: 20.0,
            width: 40.0,
            height: 60.0,
        };
        let mut points = vec![bounds.center(); LANDMARK_COUNT];
        points[Landmark::LeftEye as usize] = Point::new(40.0, 40.0);
        points[Landmark::RightEye as usize] = Point::new(60.0, 40.0);
        LandmarkSet {
            faces: vec![FaceLandmarks {
                bounds,
                points,
                confidence: 1.0,
            }],
            timestamp_us: 0,
            frame: Resolution::new(100, 100),
        }
    }

    /// Dark dot on each eye over a light background.
    fn eyes_frame() -> FrameBuffer {
        let mut frame = FrameBuffer::solid(100, 100, Rgba::opaque(220, 220, 220), 0);
        for (ex, ey) in [(40i32, 40i32), (60, 40)] {
            for dy in -2..=2 {
                for dx in -2..=2 {
                    let idx = ((ey + dy) * 100 + ex + dx) as usize;
                    frame.pixels_mut()[idx] = Rgba::opaque(0, 0, 0);
                }
            }
        }
        frame
    }

    fn dark_count(frame: &FrameBuffer) -> usize {
        frame.pixels().iter().filter(|p| p.r < 110).count()
    }

    #[test]
    fn enlarges_eyes() {
        let set = face_set();
        let ctx = FrameContext {
            landmarks: Some(&set),
            time_s: 0.0,
        };
        let mut frame = eyes_frame();
        let before = dark_count(&frame);
        FaceWarpEffect::new(1.0, 0.0).apply(&mut frame, &ctx);
        assert!(dark_count(&frame) > before, "{} <= {before}", dark_count(&frame));
    }

    #[test]
    fn no_landmarks_leaves_frame_untouched() {
        let mut frame = eyes_frame();
        let original = frame.clone();
        FaceWarpEffect::new(1.0, 1.0).apply(&mut frame, &FrameContext::default());
        assert_eq!(frame, original);
    }

    #[test]
    fn slim_pulls_jaw_inward() {
        let set = face_set();
        let ctx = FrameContext {
            landmarks: Some(&set),
            time_s: 0.0,
        };
        // Left half dark, right half light, split at the face centre + 10.
        let mut frame = FrameBuffer::solid(100, 100, Rgba::opaque(0, 0, 0), 0);
        for y in 0..100 {
            for x in 60..100 {
                frame.pixels_mut()[y * 100 + x] = Rgba::opaque(255, 255, 255);
            }
        }
        FaceWarpEffect::new(0.0, 1.0).apply(&mut frame, &ctx);
        // Below the eyes the boundary moves towards the centre.
        assert!(frame.pixel(58, 75).r > 100, "{:?}", frame.pixel(58, 75));
        // Above the eyes nothing moves.
        assert_eq!(frame.pixel(58, 30).r, 0);
    }
}
