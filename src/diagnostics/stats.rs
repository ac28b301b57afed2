use serde::Serialize;
use std::time::{Duration, Instant};

/// Collects diagnostic statistics for a running pipeline.
pub struct DiagnosticStats {
    captured: u64,
    dropped: u64,
    corrupt: u64,
    failures: u64,
    composited: u64,
    total_bytes: u64,
    start_time: Instant,
    latency_us: u64,
}

/// Snapshot of diagnostic stats for the method channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSnapshot {
    pub fps: f64,
    pub captured_frames: u64,
    pub dropped_frames: u64,
    pub corrupt_frames: u64,
    pub device_failures: u64,
    pub composited_frames: u64,
    pub drop_rate: f64,
    pub latency_ms: f64,
    pub bandwidth_bps: u64,
    /// Frames the face tracker processed.
    pub tracked_frames: u64,
    /// Frames the face tracker skipped while a detection was still running.
    pub tracker_skips: u64,
    /// Frames the effect skipped for lack of landmarks.
    pub effect_skips: u64,
}

impl DiagnosticStats {
    /// Create new stats with zeroed counters.
    pub fn new() -> Self {
        Self {
            captured: 0,
            dropped: 0,
            corrupt: 0,
            failures: 0,
            composited: 0,
            total_bytes: 0,
            start_time: Instant::now(),
            latency_us: 0,
        }
    }

    /// Record a frame read from the device and converted.
    pub fn record_capture(&mut self, bytes: usize) {
        self.captured += 1;
        self.total_bytes += bytes as u64;
    }

    /// Record a frame evicted from the queue before composition.
    pub fn record_drop(&mut self) {
        self.dropped += 1;
    }

    pub fn record_corrupt(&mut self) {
        self.corrupt += 1;
    }

    /// Record a failed device read (timeout, corrupt or otherwise).
    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Record a frame leaving the compositor `latency` after capture.
    pub fn record_composited(&mut self, latency: Duration) {
        self.composited += 1;
        self.latency_us = latency.as_micros() as u64;
    }

    /// Composited frames per second since the last reset.
    pub fn fps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0.0;
        }
        self.composited as f64 / elapsed
    }

    /// Drop rate as a percentage (0.0 - 100.0).
    pub fn drop_rate(&self) -> f64 {
        let total = self.captured + self.corrupt;
        if total == 0 {
            return 0.0;
        }
        ((self.dropped + self.corrupt) as f64 / total as f64 * 100.0).min(100.0)
    }

    /// Latest capture-to-composite latency in milliseconds.
    pub fn latency_ms(&self) -> f64 {
        self.latency_us as f64 / 1000.0
    }

    /// Converted frame bytes per second.
    pub fn bandwidth_bps(&self) -> u64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0;
        }
        (self.total_bytes as f64 / elapsed) as u64
    }

    /// Reset all counters.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Take a serialisable snapshot.
    pub fn snapshot(&self) -> DiagnosticSnapshot {
        DiagnosticSnapshot {
            fps: self.fps(),
            captured_frames: self.captured,
            dropped_frames: self.dropped,
            corrupt_frames: self.corrupt,
            device_failures: self.failures,
            composited_frames: self.composited,
            drop_rate: self.drop_rate(),
            latency_ms: self.latency_ms(),
            bandwidth_bps: self.bandwidth_bps(),
            tracked_frames: 0,
            tracker_skips: 0,
            effect_skips: 0,
        }
    }
}

impl Default for DiagnosticStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn initialises_with_zero_values() {
        let stats = DiagnosticStats::new();
        assert_eq!(stats.captured, 0);
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.latency_us, 0);
    }

    #[test]
    fn record_capture_counts_frames_and_bytes() {
        let mut stats = DiagnosticStats::new();
        stats.record_capture(1000);
        stats.record_capture(1000);
        assert_eq!(stats.captured, 2);
        assert_eq!(stats.total_bytes, 2000);
    }

    #[test]
    fn fps_counts_composited_frames() {
        let mut stats = DiagnosticStats::new();
        for _ in 0..30 {
            stats.record_composited(Duration::from_millis(4));
        }
        thread::sleep(Duration::from_millis(100));
        let fps = stats.fps();
        assert!(fps > 0.0, "fps should be positive, got {fps}");
        assert_eq!(stats.latency_ms(), 4.0);
    }

    #[test]
    fn drop_rate_includes_corrupt_frames() {
        let mut stats = DiagnosticStats::new();
        stats.record_capture(10);
        stats.record_capture(10);
        stats.record_capture(10);
        stats.record_drop();
        stats.record_corrupt();
        // 2 lost out of 4 delivered by the device.
        assert!((stats.drop_rate() - 50.0).abs() < 0.01, "{}", stats.drop_rate());
    }

    #[test]
    fn drop_rate_zero_when_no_events() {
        let stats = DiagnosticStats::new();
        assert_eq!(stats.drop_rate(), 0.0);
    }

    #[test]
    fn reset_clears_all_counters() {
        let mut stats = DiagnosticStats::new();
        stats.record_capture(1000);
        stats.record_drop();
        stats.record_failure();
        stats.reset();
        assert_eq!(stats.snapshot().captured_frames, 0);
        assert_eq!(stats.snapshot().device_failures, 0);
    }

    #[test]
    fn snapshot_serialises_camel_case() {
        let mut stats = DiagnosticStats::new();
        stats.record_capture(5000);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["capturedFrames"], 1);
        assert!(json["droppedFrames"].is_number());
        assert!(json["latencyMs"].is_number());
    }
}
