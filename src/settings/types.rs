use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// What happens when an effect needs landmarks while face detection is off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaceDetectionPolicy {
    /// Refuse the effect with `requires-face-detection`.
    #[default]
    Reject,
    /// Switch face detection on as part of setting the effect.
    AutoEnable,
}

/// Tunables for a camera effects session.
///
/// Every field has a default, so a config file only needs the keys it
/// overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EffectsConfig {
    /// Frames buffered between capture and composition before the oldest
    /// is dropped.
    pub queue_capacity: usize,
    pub operation_timeout_ms: u64,
    /// How long the capture thread waits on a single frame.
    pub frame_timeout_ms: u64,
    pub max_consecutive_failures: u32,
    /// Oldest landmark set still applied to a frame.
    pub landmark_max_age_ms: u64,
    pub face_detection_policy: FaceDetectionPolicy,
    pub jpeg_quality: u8,
    /// Width frames are downscaled to before face detection.
    pub tracker_input_width: u32,
    pub event_capacity: usize,
    pub progress_interval_ms: u64,
    /// Where auto-named recordings are written.
    pub output_dir: PathBuf,
    pub gallery_dir: PathBuf,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("camera-effects");
        Self {
            queue_capacity: 3,
            operation_timeout_ms: 5_000,
            frame_timeout_ms: 1_000,
            max_consecutive_failures: 10,
            landmark_max_age_ms: 250,
            face_detection_policy: FaceDetectionPolicy::Reject,
            jpeg_quality: 90,
            tracker_input_width: 320,
            event_capacity: 64,
            progress_interval_ms: 1_000,
            gallery_dir: base.join("gallery"),
            output_dir: base,
        }
    }
}

impl EffectsConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn landmark_max_age(&self) -> Duration {
        Duration::from_millis(self.landmark_max_age_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Clamp values that would stall or break the pipeline.
    pub fn sanitized(mut self) -> Self {
        self.queue_capacity = self.queue_capacity.max(1);
        self.event_capacity = self.event_capacity.max(1);
        self.max_consecutive_failures = self.max_consecutive_failures.max(1);
        self.jpeg_quality = self.jpeg_quality.clamp(1, 100);
        self.tracker_input_width = self.tracker_input_width.max(32);
        self.frame_timeout_ms = self.frame_timeout_ms.max(1);
        self.operation_timeout_ms = self.operation_timeout_ms.max(1);
        self.progress_interval_ms = self.progress_interval_ms.max(10);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = EffectsConfig::default();
        assert_eq!(config.queue_capacity, 3);
        assert_eq!(config.face_detection_policy, FaceDetectionPolicy::Reject);
        assert_eq!(config.operation_timeout(), Duration::from_secs(5));
        assert!(config.gallery_dir.starts_with(&config.output_dir));
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let json = r#"{ "queueCapacity": 8, "faceDetectionPolicy": "autoEnable" }"#;
        let config: EffectsConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.face_detection_policy, FaceDetectionPolicy::AutoEnable);
        assert_eq!(config.jpeg_quality, 90);
    }

    #[test]
    fn serialises_to_camel_case() {
        let json = serde_json::to_value(EffectsConfig::default()).unwrap();
        assert_eq!(json["maxConsecutiveFailures"], 10);
        assert_eq!(json["faceDetectionPolicy"], "reject");
    }

    #[test]
    fn sanitized_clamps_degenerate_values() {
        let config = EffectsConfig {
            queue_capacity: 0,
            jpeg_quality: 0,
            tracker_input_width: 4,
            ..EffectsConfig::default()
        }
        .sanitized();
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.jpeg_quality, 1);
        assert_eq!(config.tracker_input_width, 32);
    }
}
