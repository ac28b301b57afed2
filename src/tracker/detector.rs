use std::collections::VecDeque;

use crate::frame::{FrameBuffer, Rgba};
use crate::tracker::types::{FaceLandmarks, FaceRect, Landmark, Point, LANDMARK_COUNT};

/// Finds faces in a frame. Takes `&mut self` so implementations may carry
/// state between frames.
pub trait FaceDetector: Send {
    /// Faces in `frame`, in that frame's pixel coordinates.
    fn detect(&mut self, frame: &FrameBuffer) -> Vec<FaceLandmarks>;
}

/// Canonical keypoint layout within a face box, as (x, y) fractions.
const LAYOUT: [(f32, f32); LANDMARK_COUNT] = [
    (0.30, 0.39), // left eye
    (0.70, 0.39), // right eye
    (0.30, 0.30), // left brow
    (0.70, 0.30), // right brow
    (0.50, 0.55), // nose tip
    (0.38, 0.72), // mouth left
    (0.62, 0.72), // mouth right
    (0.50, 0.97), // chin
    (0.12, 0.75), // left jaw
    (0.88, 0.75), // right jaw
    (0.25, 0.60), // left cheek
    (0.75, 0.60), // right cheek
];

const MIN_CELLS: usize = 6;
const MIN_ASPECT: f32 = 0.8;
const MAX_ASPECT: f32 = 2.2;
const MIN_FILL: f32 = 0.45;
const DARK_LUMA: f32 = 0.2;

/// Classic YCbCr skin classification (Chai and Ngan ranges).
fn is_skin(px: Rgba) -> bool {
    let (r, g, b) = (f32::from(px.r), f32::from(px.g), f32::from(px.b));
    let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    (77.0..=127.0).contains(&cb) && (133.0..=173.0).contains(&cr)
}

/// Skin-colour blob detector with dark-region eye refinement.
///
/// Works on a coarse grid so it stays cheap at tracker resolution. Good
/// enough for frontal faces under even lighting.
#[derive(Debug, Default)]
pub struct SkinToneDetector {
    /// Grid reused between frames.
    cells: Vec<bool>,
}

impl SkinToneDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn classify_cells(&mut self, frame: &FrameBuffer, cell: u32) -> (usize, usize) {
        let (w, h) = (frame.width(), frame.height());
        let cols = w.div_ceil(cell) as usize;
        let rows = h.div_ceil(cell) as usize;
        self.cells.clear();
        self.cells.resize(cols * rows, false);

        let pixels = frame.pixels();
        for row in 0..rows {
            for col in 0..cols {
                let (x0, y0) = (col as u32 * cell, row as u32 * cell);
                let (x1, y1) = ((x0 + cell).min(w), (y0 + cell).min(h));
                let mut skin = 0u32;
                for y in y0..y1 {
                    for x in x0..x1 {
                        if is_skin(pixels[(y * w + x) as usize]) {
                            skin += 1;
                        }
                    }
                }
                let total = (x1 - x0) * (y1 - y0);
                self.cells[row * cols + col] = skin * 2 > total;
            }
        }
        (cols, rows)
    }

    /// 4-connected skin components as (min_col, min_row, max_col, max_row, cells).
    fn components(&self, cols: usize, rows: usize) -> Vec<(usize, usize, usize, usize, usize)> {
        let mut seen = vec![false; self.cells.len()];
        let mut out = Vec::new();
        let mut queue = VecDeque::new();
        for start in 0..self.cells.len() {
            if !self.cells[start] || seen[start] {
                continue;
            }
            seen[start] = true;
            queue.push_back(start);
            let (mut c0, mut r0, mut c1, mut r1, mut n) = (usize::MAX, usize::MAX, 0, 0, 0);
            while let Some(idx) = queue.pop_front() {
                let (c, r) = (idx % cols, idx / cols);
                c0 = c0.min(c);
                r0 = r0.min(r);
                c1 = c1.max(c);
                r1 = r1.max(r);
                n += 1;
                let mut visit = |next: usize| {
                    if self.cells[next] && !seen[next] {
                        seen[next] = true;
                        queue.push_back(next);
                    }
                };
                if c > 0 {
                    visit(idx - 1);
                }
                if c + 1 < cols {
                    visit(idx + 1);
                }
                if r > 0 {
                    visit(idx - cols);
                }
                if r + 1 < rows {
                    visit(idx + cols);
                }
            }
            out.push((c0, r0, c1, r1, n));
        }
        out
    }

    /// Centroid of dark pixels inside the face ellipse within `[x0, x1)`
    /// over the upper half of the box.
    fn dark_centroid(frame: &FrameBuffer, bounds: FaceRect, x0: f32, x1: f32) -> Option<Point> {
        let center = bounds.center();
        let (rx, ry) = (bounds.width * 0.45, bounds.height * 0.45);
        let y0 = bounds.y.max(0.0) as u32;
        let y1 = ((bounds.y + bounds.height * 0.5) as u32).min(frame.height());
        let xa = x0.max(0.0) as u32;
        let xb = (x1 as u32).min(frame.width());

        let (mut sx, mut sy, mut n) = (0.0f32, 0.0f32, 0u32);
        for y in y0..y1 {
            for x in xa..xb {
                let (fx, fy) = (x as f32 + 0.5, y as f32 + 0.5);
                let dx = (fx - center.x) / rx;
                let dy = (fy - center.y) / ry;
                if dx * dx + dy * dy > 1.0 {
                    continue;
                }
                if frame.pixel(x, y).luma() < DARK_LUMA {
                    sx += fx;
                    sy += fy;
                    n += 1;
                }
            }
        }
        (n > 0).then(|| Point::new(sx / n as f32, sy / n as f32))
    }

    fn landmarks(frame: &FrameBuffer, bounds: FaceRect, confidence: f32) -> FaceLandmarks {
        let mut points: Vec<Point> = LAYOUT
            .iter()
            .map(|&(u, v)| Point::new(bounds.x + u * bounds.width, bounds.y + v * bounds.height))
            .collect();

        let mid = bounds.center().x;
        let left = Self::dark_centroid(frame, bounds, bounds.x, mid);
        let right = Self::dark_centroid(frame, bounds, mid, bounds.x + bounds.width);
        let brow_lift = bounds.height * (LAYOUT[0].1 - LAYOUT[2].1);
        if let Some(eye) = left {
            points[Landmark::LeftEye as usize] = eye;
            points[Landmark::LeftBrow as usize] = Point::new(eye.x, eye.y - brow_lift);
        }
        if let Some(eye) = right {
            points[Landmark::RightEye as usize] = eye;
            points[Landmark::RightBrow as usize] = Point::new(eye.x, eye.y - brow_lift);
        }

        FaceLandmarks {
            bounds,
            points,
            confidence,
        }
    }
}

impl FaceDetector for SkinToneDetector {
    fn detect(&mut self, frame: &FrameBuffer) -> Vec<FaceLandmarks> {
        if frame.width() < 8 || frame.height() < 8 {
            return Vec::new();
        }
        let cell = (frame.width() / 64).max(2);
        let (cols, rows) = self.classify_cells(frame, cell);

        let mut faces: Vec<FaceLandmarks> = self
            .components(cols, rows)
            .into_iter()
            .filter_map(|(c0, r0, c1, r1, n)| {
                let (bw, bh) = (c1 - c0 + 1, r1 - r0 + 1);
                let aspect = bh as f32 / bw as f32;
                let fill = n as f32 / (bw * bh) as f32;
                if n < MIN_CELLS || !(MIN_ASPECT..=MAX_ASPECT).contains(&aspect) || fill < MIN_FILL {
                    return None;
                }
                let cell = cell as f32;
                let x = c0 as f32 * cell;
                let y = r0 as f32 * cell;
                let bounds = FaceRect {
                    x,
                    y,
                    width: (bw as f32 * cell).min(frame.width() as f32 - x),
                    height: (bh as f32 * cell).min(frame.height() as f32 - y),
                };
                Some(Self::landmarks(frame, bounds, fill.min(1.0)))
            })
            .collect();

        faces.sort_by(|a, b| {
            let area = |f: &FaceLandmarks| f.bounds.width * f.bounds.height;
            area(b).total_cmp(&area(a))
        });
        faces
    }
}
