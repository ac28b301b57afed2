use serde::Serialize;

use crate::camera::types::Resolution;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn midpoint(self, other: Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// Axis-aligned face bounds in frame pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FaceRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceRect {
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.y >= self.y && p.x < self.x + self.width && p.y < self.y + self.height
    }

    /// Grow by `factor` of the size on every side.
    pub fn expanded(&self, factor: f32) -> FaceRect {
        let dx = self.width * factor;
        let dy = self.height * factor;
        FaceRect {
            x: self.x - dx,
            y: self.y - dy,
            width: self.width + 2.0 * dx,
            height: self.height + 2.0 * dy,
        }
    }
}

/// Keypoint order within [`FaceLandmarks::points`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landmark {
    LeftEye = 0,
    RightEye,
    LeftBrow,
    RightBrow,
    NoseTip,
    MouthLeft,
    MouthRight,
    Chin,
    LeftJaw,
    RightJaw,
    LeftCheek,
    RightCheek,
}

pub const LANDMARK_COUNT: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceLandmarks {
    pub bounds: FaceRect,
    /// [`LANDMARK_COUNT`] points ordered as [`Landmark`].
    pub points: Vec<Point>,
    pub confidence: f32,
}

impl FaceLandmarks {
    pub fn point(&self, landmark: Landmark) -> Point {
        self.points
            .get(landmark as usize)
            .copied()
            .unwrap_or_else(|| self.bounds.center())
    }

    /// Distance between the eyes, the usual scale reference for face effects.
    pub fn eye_distance(&self) -> f32 {
        self.point(Landmark::LeftEye)
            .distance(self.point(Landmark::RightEye))
    }
}

/// Faces found in one frame, tagged with that frame's timestamp and size.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LandmarkSet {
    pub faces: Vec<FaceLandmarks>,
    pub timestamp_us: u64,
    pub frame: Resolution,
}

impl LandmarkSet {
    pub fn empty(timestamp_us: u64, frame: Resolution) -> Self {
        Self {
            faces: Vec::new(),
            timestamp_us,
            frame,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Rescale every coordinate to a frame of size `target`.
    pub fn scaled_to(&self, target: Resolution) -> LandmarkSet {
        if target == self.frame || self.frame.width == 0 || self.frame.height == 0 {
            return self.clone();
        }
        let sx = target.width as f32 / self.frame.width as f32;
        let sy = target.height as f32 / self.frame.height as f32;
        let faces = self
            .faces
            .iter()
            .map(|face| FaceLandmarks {
                bounds: FaceRect {
                    x: face.bounds.x * sx,
                    y: face.bounds.y * sy,
                    width: face.bounds.width * sx,
                    height: face.bounds.height * sy,
                },
                points: face
                    .points
                    .iter()
                    .map(|p| Point::new(p.x * sx, p.y * sy))
                    .collect(),
                confidence: face.confidence,
            })
            .collect();
        LandmarkSet {
            faces,
            timestamp_us: self.timestamp_us,
            frame: target,
        }
    }
}
