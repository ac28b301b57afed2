use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::camera::types::Resolution;
use crate::frame::FrameBuffer;
use crate::tracker::detector::FaceDetector;
use crate::tracker::types::LandmarkSet;

/// Face presence transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceEvent {
    Detected { count: usize },
    Lost,
}

/// Called from the tracker thread on every [`FaceEvent`].
pub type FaceCallback = Arc<dyn Fn(FaceEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct TrackerOptions {
    /// Frames are downscaled to this width before detection.
    pub input_width: u32,
    /// Oldest result still handed out for a frame.
    pub max_age: Duration,
}

struct Shared {
    latest: Mutex<Option<Arc<LandmarkSet>>>,
    busy: AtomicBool,
    enabled: AtomicBool,
    faces_present: AtomicBool,
    processed: AtomicU64,
    skipped: AtomicU64,
}

/// Runs a [`FaceDetector`] on its own thread, off the frame path.
///
/// The compositor never waits for detection: `submit` hands a frame over
/// only when the detector is idle, and `landmarks_for` returns whatever
/// result is recent enough.
pub struct FaceTracker {
    shared: Arc<Shared>,
    sender: Mutex<Option<SyncSender<FrameBuffer>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    options: TrackerOptions,
}

impl FaceTracker {
    pub fn spawn(
        detector: Box<dyn FaceDetector>,
        options: TrackerOptions,
        on_event: Option<FaceCallback>,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            latest: Mutex::new(None),
            busy: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
            faces_present: AtomicBool::new(false),
            processed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        });
        let (tx, rx) = mpsc::sync_channel::<FrameBuffer>(1);

        let thread = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("face-tracker".into())
                .spawn(move || run(detector, rx, shared, options, on_event))?
        };

        Ok(Self {
            shared,
            sender: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
            options,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// Turn detection on or off. Turning it off forgets the last result.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.shared.enabled.swap(enabled, Ordering::AcqRel);
        if was && !enabled {
            self.shared.latest.lock().take();
            self.shared.faces_present.store(false, Ordering::Release);
        }
        if was != enabled {
            info!(enabled, "face detection toggled");
        }
    }

    /// Offer a frame for detection. Never blocks; returns false when the
    /// frame was skipped because detection is off or still busy.
    pub fn submit(&self, frame: &FrameBuffer) -> bool {
        if !self.is_enabled() {
            return false;
        }
        if self
            .shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.shared.skipped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            self.shared.busy.store(false, Ordering::Release);
            return false;
        };
        match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.shared.busy.store(false, Ordering::Release);
                self.shared.skipped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// The latest landmark set if it is no older than the configured max
    /// age relative to `timestamp_us`, scaled to `frame`.
    pub fn landmarks_for(&self, timestamp_us: u64, frame: Resolution) -> Option<LandmarkSet> {
        if !self.is_enabled() {
            return None;
        }
        let latest = self.shared.latest.lock().clone()?;
        let max_age = self.options.max_age.as_micros() as u64;
        if timestamp_us.abs_diff(latest.timestamp_us) > max_age {
            return None;
        }
        Some(latest.scaled_to(frame))
    }

    /// Most recent result regardless of age.
    pub fn latest(&self) -> Option<Arc<LandmarkSet>> {
        self.shared.latest.lock().clone()
    }

    pub fn processed_frames(&self) -> u64 {
        self.shared.processed.load(Ordering::Relaxed)
    }

    pub fn skipped_frames(&self) -> u64 {
        self.shared.skipped.load(Ordering::Relaxed)
    }

    /// Stop the detector thread. Safe to call more than once.
    pub fn shutdown(&self) {
        self.set_enabled(false);
        self.sender.lock().take();
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("face tracker thread panicked");
            }
        }
    }
}

impl Drop for FaceTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    mut detector: Box<dyn FaceDetector>,
    rx: Receiver<FrameBuffer>,
    shared: Arc<Shared>,
    options: TrackerOptions,
    on_event: Option<FaceCallback>,
) {
    debug!("face tracker thread starting");
    while let Ok(frame) = rx.recv() {
        let original = frame.resolution();
        let timestamp_us = frame.timestamp_us;
        let target_w = options.input_width.min(original.width).max(1);
        let target_h = ((u64::from(original.height) * u64::from(target_w))
            / u64::from(original.width.max(1)))
        .max(1) as u32;
        let small = match frame.resized(Resolution::new(target_w, target_h), 1.0) {
            Ok(small) => small,
            Err(e) => {
                warn!("tracker downscale failed: {e}");
                shared.busy.store(false, Ordering::Release);
                continue;
            }
        };

        let faces = detector.detect(&small);
        let count = faces.len();
        let set = LandmarkSet {
            faces,
            timestamp_us,
            frame: small.resolution(),
        }
        .scaled_to(original);
        shared.processed.fetch_add(1, Ordering::Relaxed);

        if shared.enabled.load(Ordering::Acquire) {
            *shared.latest.lock() = Some(Arc::new(set));
            let was_present = shared.faces_present.swap(count > 0, Ordering::AcqRel);
            let event = match (was_present, count > 0) {
                (false, true) => Some(FaceEvent::Detected { count }),
                (true, false) => Some(FaceEvent::Lost),
                _ => None,
            };
            if let (Some(event), Some(cb)) = (event, &on_event) {
                debug!(?event, "face presence changed");
                cb(event);
            }
        }
        shared.busy.store(false, Ordering::Release);
    }
    debug!("face tracker thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Rgba;
    use crate::tracker::types::{FaceLandmarks, FaceRect};
    use std::time::Instant;

    /// Reports one face on every frame whose first pixel is red.
    struct RedMeansFace;

    impl FaceDetector for RedMeansFace {
        fn detect(&mut self, frame: &FrameBuffer) -> Vec<FaceLandmarks> {
            if frame.pixel(0, 0).r < 200 {
                return Vec::new();
            }
            vec![FaceLandmarks {
                bounds: FaceRect {
                    x: 10.0,
                    y: 10.0,
                    width: 20.0,
                    height: 20.0,
                },
                points: Vec::new(),
                confidence: 1.0,
            }]
        }
    }

    fn options() -> TrackerOptions {
        TrackerOptions {
            input_width: 80,
            max_age: Duration::from_millis(100),
        }
    }

    fn wait_for(mut f: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn red(ts: u64) -> FrameBuffer {
        FrameBuffer::solid(160, 120, Rgba::opaque(255, 0, 0), ts)
    }

    #[test]
    fn disabled_tracker_ignores_frames() {
        let tracker = FaceTracker::spawn(Box::new(RedMeansFace), options(), None).unwrap();
        assert!(!tracker.submit(&red(0)));
        assert!(tracker.landmarks_for(0, Resolution::new(160, 120)).is_none());
    }

    #[test]
    fn results_are_scaled_back_and_age_limited() {
        let tracker = FaceTracker::spawn(Box::new(RedMeansFace), options(), None).unwrap();
        tracker.set_enabled(true);
        assert!(tracker.submit(&red(1_000_000)));
        assert!(wait_for(|| tracker.latest().is_some()));

        let set = tracker
            .landmarks_for(1_050_000, Resolution::new(160, 120))
            .unwrap();
        assert_eq!(set.faces.len(), 1);
        // Detected at 80x60, reported at 160x120.
        assert_eq!(set.faces[0].bounds.x, 20.0);
        assert!(tracker
            .landmarks_for(1_200_000, Resolution::new(160, 120))
            .is_none());
    }

    #[test]
    fn emits_presence_transitions() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let cb: FaceCallback = Arc::new(move |e| sink.lock().push(e));
        let tracker = FaceTracker::spawn(Box::new(RedMeansFace), options(), Some(cb)).unwrap();
        tracker.set_enabled(true);

        let submit = |frame: FrameBuffer| {
            assert!(wait_for(|| tracker.submit(&frame)));
        };
        submit(red(0));
        assert!(wait_for(|| events.lock().len() == 1));
        submit(red(1));
        submit(FrameBuffer::solid(160, 120, Rgba::opaque(0, 0, 0), 2));
        assert!(wait_for(|| events.lock().len() == 2));
        assert_eq!(
            *events.lock(),
            vec![FaceEvent::Detected { count: 1 }, FaceEvent::Lost]
        );
    }

    /// Holds each detection until the test releases it.
    struct Gated(mpsc::Receiver<()>);

    impl FaceDetector for Gated {
        fn detect(&mut self, _frame: &FrameBuffer) -> Vec<FaceLandmarks> {
            let _ = self.0.recv();
            Vec::new()
        }
    }

    #[test]
    fn busy_detector_skips_frames() {
        let (release, gate) = mpsc::channel();
        let tracker = FaceTracker::spawn(Box::new(Gated(gate)), options(), None).unwrap();
        tracker.set_enabled(true);
        assert!(tracker.submit(&red(0)));
        assert!(!tracker.submit(&red(1)));
        assert!(!tracker.submit(&red(2)));
        assert_eq!(tracker.skipped_frames(), 2);

        release.send(()).unwrap();
        assert!(wait_for(|| tracker.processed_frames() == 1));
        assert_eq!(tracker.skipped_frames(), 2);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let tracker = FaceTracker::spawn(Box::new(RedMeansFace), options(), None).unwrap();
        tracker.set_enabled(true);
        tracker.shutdown();
        tracker.shutdown();
        assert!(!tracker.submit(&red(0)));
    }

    #[test]
    fn tracker_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FaceTracker>();
    }
}
