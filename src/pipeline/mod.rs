//! Capture-to-output plumbing.
//!
//! A [`FrameSource`] thread reads the camera into a bounded [`FrameQueue`];
//! a compositor worker drains it, runs face tracking and the active
//! filter/effect, and hands results to the preview, pending photo requests
//! and the active recorder.

pub mod queue;
pub mod source;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::camera::backend::{AudioCapture, CameraBackend};
use crate::camera::error::CameraError;
use crate::camera::types::{CameraDevice, CaptureConfig, FlashMode, Lens, Resolution};
use crate::diagnostics::{DiagnosticSnapshot, DiagnosticStats};
use crate::effects::compositor::{Compositor, Stages};
use crate::frame::FrameBuffer;
use crate::output::preview::PreviewSink;
use crate::output::recorder::Recorder;
use crate::settings::EffectsConfig;
use crate::tracker::FaceTracker;

pub use queue::{FrameQueue, Pop};
pub use source::FrameSource;
use worker::{Worker, WorkerMessage};

/// Why the worker gave a recorder back on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingEnd {
    /// The requested max duration was reached.
    Limit,
    /// Writing failed; the recorder is handed back for a best-effort finish.
    Failed(String),
}

/// Things the pipeline threads report to whoever owns the pipeline.
pub enum PipelineNotice {
    /// The camera failed. `fatal` means the capture thread has exited.
    HardwareUnavailable { message: String, fatal: bool },
    RecordingEnded {
        recorder: Box<Recorder>,
        reason: RecordingEnd,
    },
    Progress { duration: Duration },
}

impl std::fmt::Debug for PipelineNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HardwareUnavailable { message, fatal } => f
                .debug_struct("HardwareUnavailable")
                .field("message", message)
                .field("fatal", fatal)
                .finish(),
            Self::RecordingEnded { recorder, reason } => f
                .debug_struct("RecordingEnded")
                .field("path", &recorder.path())
                .field("reason", reason)
                .finish(),
            Self::Progress { duration } => f.debug_struct("Progress").field("duration", duration).finish(),
        }
    }
}

/// Receives [`PipelineNotice`]s, called from the pipeline threads.
pub type Notifier = Arc<dyn Fn(PipelineNotice) + Send + Sync>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error("failed to spawn pipeline thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("pipeline is not running")]
    NotRunning,

    #[error("no frame composited within {}ms", .0.as_millis())]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// State shared by the capture thread, the compositor worker and the owner.
pub struct PipelineShared {
    pub(crate) queue: FrameQueue,
    pub(crate) compositor: Arc<Compositor>,
    pub(crate) tracker: Arc<FaceTracker>,
    pub(crate) preview: Arc<PreviewSink>,
    pub(crate) stats: Mutex<DiagnosticStats>,
    pub(crate) config: EffectsConfig,
    pub(crate) resolution: Resolution,
    /// Capture timestamps and latency are measured from here.
    pub(crate) epoch: Instant,
    pub(crate) notify: Notifier,
    zoom: AtomicU32,
    preview_enabled: AtomicBool,
}

impl PipelineShared {
    pub fn zoom(&self) -> f32 {
        f32::from_bits(self.zoom.load(Ordering::Relaxed))
    }

    fn set_zoom(&self, zoom: f32) {
        self.zoom.store(zoom.to_bits(), Ordering::Relaxed);
    }

    pub fn preview_enabled(&self) -> bool {
        self.preview_enabled.load(Ordering::Acquire)
    }
}

/// Collaborators the pipeline composites with and publishes to.
pub struct PipelineParts {
    pub compositor: Arc<Compositor>,
    pub tracker: Arc<FaceTracker>,
    pub preview: Arc<PreviewSink>,
    pub notify: Notifier,
}

/// The running capture pipeline of one session.
pub struct Pipeline {
    shared: Arc<PipelineShared>,
    source: FrameSource,
    worker: Option<Worker>,
}

/// Upper bound for zoom when the device does not report one.
const DEFAULT_MAX_ZOOM: f32 = 10.0;

impl Pipeline {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        capture: &CaptureConfig,
        config: EffectsConfig,
        parts: PipelineParts,
    ) -> Self {
        let shared = Arc::new(PipelineShared {
            queue: FrameQueue::new(config.queue_capacity),
            compositor: parts.compositor,
            tracker: parts.tracker,
            preview: parts.preview,
            stats: Mutex::new(DiagnosticStats::new()),
            resolution: capture.resolution(),
            config,
            epoch: Instant::now(),
            notify: parts.notify,
            zoom: AtomicU32::new(capture.zoom.max(1.0).to_bits()),
            preview_enabled: AtomicBool::new(false),
        });
        let source = FrameSource::new(backend, capture.stream_request(), capture.lens, capture.flash_mode);
        Self {
            shared,
            source,
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.source.is_running()
    }

    pub fn resolution(&self) -> Resolution {
        self.shared.resolution
    }

    pub fn lens(&self) -> Lens {
        self.source.lens()
    }

    pub fn flash(&self) -> FlashMode {
        self.source.flash()
    }

    pub fn zoom(&self) -> f32 {
        self.shared.zoom()
    }

    pub fn device(&self) -> Option<&CameraDevice> {
        self.source.device()
    }

    pub fn is_previewing(&self) -> bool {
        self.is_running() && self.shared.preview_enabled()
    }

    /// Start capture and composition. Restarting a running pipeline only
    /// updates whether frames go to the preview.
    pub fn start(&mut self, preview: bool) -> Result<()> {
        if self.is_running() {
            self.shared.preview_enabled.store(preview, Ordering::Release);
            return Ok(());
        }
        // Either half may have exited on its own after a fatal camera error.
        let recorder = self.stop();
        self.shared.preview_enabled.store(preview, Ordering::Release);

        self.shared.queue.reopen();
        self.shared.stats.lock().reset();
        let worker = Worker::spawn(Arc::clone(&self.shared), recorder).map_err(PipelineError::Spawn)?;
        self.worker = Some(worker);
        if let Err(e) = self.source.start(Arc::clone(&self.shared)) {
            self.stop();
            return Err(e);
        }
        self.set_zoom(self.zoom());
        info!(preview, resolution = %self.shared.resolution, "pipeline started");
        Ok(())
    }

    /// Stop the camera, let the frame in flight finish, discard whatever is
    /// still queued and join the worker. Hands back an attached recorder.
    pub fn stop(&mut self) -> Option<Box<Recorder>> {
        self.shared.preview_enabled.store(false, Ordering::Release);
        self.source.stop();
        self.shared.queue.close();
        let recorder = self.worker.take().and_then(Worker::join);
        if recorder.is_some() {
            debug!("recorder returned by stopped pipeline");
        }
        recorder
    }

    pub fn switch_lens(&mut self, lens: Lens) -> Result<()> {
        let timeout = self.shared.config.operation_timeout();
        self.source.switch_lens(lens, timeout)?;
        // The new camera may not zoom as far.
        self.set_zoom(self.zoom());
        Ok(())
    }

    /// Set the digital zoom, clamped to what the current camera allows.
    /// Returns the zoom actually applied.
    pub fn set_zoom(&self, zoom: f32) -> f32 {
        let max = self
            .source
            .device()
            .map_or(DEFAULT_MAX_ZOOM, |d| d.max_zoom)
            .max(1.0);
        let zoom = if zoom.is_finite() { zoom.clamp(1.0, max) } else { 1.0 };
        self.shared.set_zoom(zoom);
        zoom
    }

    pub fn set_flash(&mut self, mode: FlashMode) -> Result<()> {
        let timeout = self.shared.config.operation_timeout();
        Ok(self.source.set_flash(mode, timeout)?)
    }

    /// Composite the next frame with `stages`. A stopped pipeline is started
    /// for the capture and stopped again afterwards.
    pub fn capture_frame(&mut self, stages: Stages, timeout: Duration) -> Result<FrameBuffer> {
        let temporary = !self.is_running();
        if temporary {
            self.start(false)?;
        }
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let sent = self
            .worker
            .as_ref()
            .is_some_and(|w| w.send(WorkerMessage::Photo { stages, reply: reply_tx }));
        let result = if sent {
            reply_rx
                .recv_timeout(timeout)
                .map_err(|_| PipelineError::Timeout(timeout))
        } else {
            Err(PipelineError::NotRunning)
        };
        if temporary {
            self.stop();
        }
        result
    }

    /// Route composited frames into `recorder` until detached.
    pub fn attach_recorder(&self, recorder: Box<Recorder>) -> Result<()> {
        match &self.worker {
            Some(worker) if worker.send(WorkerMessage::AttachRecorder(recorder)) => Ok(()),
            _ => Err(PipelineError::NotRunning),
        }
    }

    /// Take the recorder back from the worker. `None` when nothing was
    /// attached or the worker already handed it back on its own.
    pub fn detach_recorder(&self) -> Option<Box<Recorder>> {
        let worker = self.worker.as_ref()?;
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        if !worker.send(WorkerMessage::DetachRecorder(reply_tx)) {
            return None;
        }
        reply_rx
            .recv_timeout(self.shared.config.operation_timeout())
            .ok()
            .flatten()
    }

    /// Open the microphone of the camera backend, if it has one.
    pub fn open_audio(&self) -> std::result::Result<Option<Box<dyn AudioCapture>>, CameraError> {
        self.source.backend().open_audio()
    }

    pub fn diagnostics(&self) -> DiagnosticSnapshot {
        let mut snapshot = self.shared.stats.lock().snapshot();
        snapshot.tracked_frames = self.shared.tracker.processed_frames();
        snapshot.tracker_skips = self.shared.tracker.skipped_frames();
        snapshot.effect_skips = self.shared.compositor.effect_skips();
        snapshot
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
