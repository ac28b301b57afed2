use crate::effects::effect::{EffectKind, FrameEffect};
use crate::effects::FrameContext;
use crate::frame::{FrameBuffer, Rgba};
use crate::tracker::types::FaceRect;

/// Edge-preserving skin smoothing plus a gentle brightening curve.
pub struct BeautifyEffect {
    smoothing: f32,
    whitening: f32,
    requires_landmarks: bool,
}

/// Box-sum table over RGB, one row and column larger than the frame.
struct Integral {
    sums: Vec<[u64; 3]>,
    stride: usize,
}

impl Integral {
    fn new(frame: &FrameBuffer) -> Self {
        let (w, h) = (frame.width() as usize, frame.height() as usize);
        let stride = w + 1;
        let mut sums = vec![[0u64; 3]; stride * (h + 1)];
        let pixels = frame.pixels();
        for y in 0..h {
            let mut row = [0u64; 3];
            for x in 0..w {
                let p = pixels[y * w + x];
                row[0] += u64::from(p.r);
                row[1] += u64::from(p.g);
                row[2] += u64::from(p.b);
                let above = sums[y * stride + x + 1];
                sums[(y + 1) * stride + x + 1] =
                    [above[0] + row[0], above[1] + row[1], above[2] + row[2]];
            }
        }
        Self { sums, stride }
    }

    /// Mean colour of the inclusive box `[x0, x1] x [y0, y1]`.
    fn mean(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> [f32; 3] {
        let s = self.stride;
        let a = self.sums[y0 * s + x0];
        let b = self.sums[y0 * s + x1 + 1];
        let c = self.sums[(y1 + 1) * s + x0];
        let d = self.sums[(y1 + 1) * s + x1 + 1];
        let n = ((x1 - x0 + 1) * (y1 - y0 + 1)) as f32;
        let mut out = [0.0f32; 3];
        for ch in 0..3 {
            out[ch] = (d[ch] + a[ch] - b[ch] - c[ch]) as f32 / n;
        }
        out
    }
}

impl BeautifyEffect {
    pub fn new(smoothing: f32, whitening: f32, requires_landmarks: bool) -> Self {
        Self {
            smoothing,
            whitening,
            requires_landmarks,
        }
    }

    fn process_region(&self, frame: &mut FrameBuffer, integral: &Integral, region: FaceRect, elliptical: bool) {
        let (fw, fh) = (frame.width() as usize, frame.height() as usize);
        let x0 = region.x.max(0.0) as usize;
        let y0 = region.y.max(0.0) as usize;
        let x1 = ((region.x + region.width).max(0.0) as usize).min(fw);
        let y1 = ((region.y + region.height).max(0.0) as usize).min(fh);
        if x1 <= x0 || y1 <= y0 {
            return;
        }

        let radius = ((region.width.min(region.height) / 40.0).round() as usize).clamp(1, 12);
        let center = region.center();
        let (half_w, half_h) = (region.width / 2.0, region.height / 2.0);
        let pixels = frame.pixels_mut();

        for y in y0..y1 {
            for x in x0..x1 {
                let weight = if elliptical {
                    let dx = (x as f32 + 0.5 - center.x) / half_w;
                    let dy = (y as f32 + 0.5 - center.y) / half_h;
                    let d = (dx * dx + dy * dy).sqrt();
                    1.0 - ((d - 0.8) / 0.2).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                if weight <= 0.0 {
                    continue;
                }

                let mean = integral.mean(
                    x.saturating_sub(radius),
                    y.saturating_sub(radius),
                    (x + radius).min(fw - 1),
                    (y + radius).min(fh - 1),
                );
                let px = &mut pixels[y * fw + x];
                *px = self.retouch(*px, mean, weight);
            }
        }
    }

    fn retouch(&self, px: Rgba, mean: [f32; 3], weight: f32) -> Rgba {
        let src = [f32::from(px.r), f32::from(px.g), f32::from(px.b)];
        // Large differences from the local mean are edges; keep them sharp.
        let diff = (0..3).map(|c| (src[c] - mean[c]).abs()).fold(0.0f32, f32::max);
        let edge_keep = (-(diff / 24.0).powi(2)).exp();
        let smooth = self.smoothing * edge_keep * weight;

        let mut out = [0u8; 3];
        for c in 0..3 {
            let v = (src[c] + (mean[c] - src[c]) * smooth) / 255.0;
            let lifted = v + (1.0 - v) * v * self.whitening * weight;
            out[c] = (lifted.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
        }
        Rgba::new(out[0], out[1], out[2], px.a)
    }
}

impl FrameEffect for BeautifyEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::Beautify
    }

    fn requires_landmarks(&self) -> bool {
        self.requires_landmarks
    }

    fn apply(&self, frame: &mut FrameBuffer, ctx: &FrameContext<'_>) {
        if frame.width() == 0 || frame.height() == 0 {
            return;
        }
        let integral = Integral::new(frame);
        match ctx.landmarks.filter(|set| !set.is_empty()) {
            Some(set) => {
                for face in &set.faces {
                    self.process_region(frame, &integral, face.bounds.expanded(0.15), true);
                }
            }
            None => {
                let full = FaceRect {
                    x: 0.0,
                    y: 0.0,
                    width: frame.width() as f32,
                    height: frame.height() as f32,
                };
                self.process_region(frame, &integral, full, false);
            }
        }
    }
}
