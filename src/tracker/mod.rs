// Face tracking: landmark detection kept off the frame path.

pub mod detector;
pub mod face_tracker;
pub mod types;

pub use detector::{FaceDetector, SkinToneDetector};
pub use face_tracker::{FaceCallback, FaceEvent, FaceTracker, TrackerOptions};
