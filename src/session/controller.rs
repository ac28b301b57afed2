use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::camera::backend::CameraBackend;
use crate::camera::types::{CaptureConfig, FlashMode, Lens, Resolution};
use crate::diagnostics::DiagnosticSnapshot;
use crate::effects::compositor::Compositor;
use crate::effects::effect::EffectSpec;
use crate::effects::filter::FilterSpec;
use crate::output::gallery::{DirectoryLibrary, MediaLibrary};
use crate::output::media_file_name;
use crate::output::photo::{store_photo, CaptureResult, PhotoOptions};
use crate::output::preview::{PreviewSink, PreviewSurface, SurfaceLostCallback, SurfaceRegistry};
use crate::output::recorder::{Recorder, RecordingOptions, RecordingResult};
use crate::pipeline::{Notifier, Pipeline, PipelineNotice, PipelineParts, RecordingEnd};
use crate::session::error::{Result, SessionError};
use crate::session::events::{EventEmitter, SessionEvent, StopReason};
use crate::session::state::SessionState;
use crate::settings::{EffectsConfig, FaceDetectionPolicy};
use crate::tracker::{FaceCallback, FaceDetector, FaceEvent, FaceTracker, SkinToneDetector, TrackerOptions};

/// Builds the face detector for each new session.
pub type DetectorFactory = Arc<dyn Fn() -> Box<dyn FaceDetector> + Send + Sync>;

/// Payload of a successful `initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub surface_handle: u64,
    pub width: u32,
    pub height: u32,
}

/// Session state readable without going through the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub surface_handle: Option<u64>,
    pub resolution: Option<Resolution>,
    pub lens: Option<Lens>,
    pub zoom: f32,
    pub flash_mode: FlashMode,
    pub face_detection: bool,
    pub filter_id: Option<String>,
    pub effect_id: Option<String>,
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Initialize(Box<CaptureConfig>, Reply<InitializeResult>),
    StartPreview(Reply<()>),
    StopPreview(Reply<()>),
    SwitchCamera(Lens, Reply<()>),
    SetFilter(Box<FilterSpec>, Reply<()>),
    SetEffect(Box<EffectSpec>, Reply<()>),
    ClearEffect(Reply<()>),
    SetZoom(f32, Reply<()>),
    SetFlash(FlashMode, Reply<()>),
    SetFaceDetection(bool, Reply<()>),
    TakePhoto(PhotoOptions, Reply<CaptureResult>),
    StartRecording(RecordingOptions, Reply<()>),
    StopRecording(bool, Reply<RecordingResult>),
    Diagnostics(Reply<DiagnosticSnapshot>),
    Dispose(Reply<()>),
}

/// Configures and starts the session actor.
pub struct SessionController {
    backend: Arc<dyn CameraBackend>,
    config: EffectsConfig,
    library: Option<Arc<dyn MediaLibrary>>,
    detector: Option<DetectorFactory>,
}

impl SessionController {
    pub fn new(backend: Arc<dyn CameraBackend>, config: EffectsConfig) -> Self {
        Self {
            backend,
            config: config.sanitized(),
            library: None,
            detector: None,
        }
    }

    /// Where `saveToGallery` publishes media. Defaults to a
    /// [`DirectoryLibrary`] at the configured gallery dir.
    pub fn with_library(mut self, library: Arc<dyn MediaLibrary>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn with_detector(mut self, detector: DetectorFactory) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Start the actor on the current tokio runtime.
    pub fn spawn(self) -> SessionHandle {
        let (tx, rx) = mpsc::channel(32);
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let events = Arc::new(EventEmitter::new(self.config.event_capacity));
        let snapshot = Arc::new(RwLock::new(SessionSnapshot::default()));
        let registry = Arc::new(SurfaceRegistry::new());
        let library = self
            .library
            .unwrap_or_else(|| Arc::new(DirectoryLibrary::new(self.config.gallery_dir.clone())));
        let detector = self
            .detector
            .unwrap_or_else(|| Arc::new(|| Box::new(SkinToneDetector::new()) as Box<dyn FaceDetector>));

        let actor = Actor {
            backend: self.backend,
            config: self.config,
            library,
            detector,
            events: Arc::clone(&events),
            registry: Arc::clone(&registry),
            snapshot: Arc::clone(&snapshot),
            state: SessionState::Uninitialized,
            session: None,
            notice_tx,
            notice_rx,
        };
        tokio::spawn(actor.run(rx));

        SessionHandle {
            tx,
            snapshot,
            events,
            registry,
        }
    }
}

/// Cloneable front door to a session. Every mutating call is serialized
/// through the controller task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
    snapshot: Arc<RwLock<SessionSnapshot>>,
    events: Arc<EventEmitter>,
    registry: Arc<SurfaceRegistry>,
}

impl SessionHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| SessionError::NotInitialized)?;
        reply_rx.await.map_err(|_| SessionError::NotInitialized)?
    }

    pub async fn initialize(&self, capture: CaptureConfig) -> Result<InitializeResult> {
        self.request(|r| Command::Initialize(Box::new(capture), r)).await
    }

    pub async fn start_preview(&self) -> Result<()> {
        self.request(Command::StartPreview).await
    }

    pub async fn stop_preview(&self) -> Result<()> {
        self.request(Command::StopPreview).await
    }

    pub async fn switch_camera(&self, lens: Lens) -> Result<()> {
        self.request(|r| Command::SwitchCamera(lens, r)).await
    }

    pub async fn set_filter(&self, spec: FilterSpec) -> Result<()> {
        self.request(|r| Command::SetFilter(Box::new(spec), r)).await
    }

    pub async fn set_ar_effect(&self, spec: EffectSpec) -> Result<()> {
        self.request(|r| Command::SetEffect(Box::new(spec), r)).await
    }

    pub async fn clear_ar_effect(&self) -> Result<()> {
        self.request(Command::ClearEffect).await
    }

    pub async fn set_zoom(&self, zoom: f32) -> Result<()> {
        self.request(|r| Command::SetZoom(zoom, r)).await
    }

    pub async fn set_flash_mode(&self, mode: FlashMode) -> Result<()> {
        self.request(|r| Command::SetFlash(mode, r)).await
    }

    pub async fn set_face_detection(&self, enabled: bool) -> Result<()> {
        self.request(|r| Command::SetFaceDetection(enabled, r)).await
    }

    pub async fn take_photo(&self, options: PhotoOptions) -> Result<CaptureResult> {
        self.request(|r| Command::TakePhoto(options, r)).await
    }

    pub async fn start_recording(&self, options: RecordingOptions) -> Result<()> {
        self.request(|r| Command::StartRecording(options, r)).await
    }

    pub async fn stop_recording(&self, save_to_gallery: bool) -> Result<RecordingResult> {
        self.request(|r| Command::StopRecording(save_to_gallery, r)).await
    }

    pub async fn diagnostics(&self) -> Result<DiagnosticSnapshot> {
        self.request(Command::Diagnostics).await
    }

    pub async fn dispose(&self) -> Result<()> {
        self.request(Command::Dispose).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().clone()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.read().state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Attach the host's surface to this session's preview handle.
    pub fn attach_surface(&self, surface: Arc<dyn PreviewSurface>) -> Result<()> {
        let handle = self
            .snapshot
            .read()
            .surface_handle
            .ok_or(SessionError::NotInitialized)?;
        Ok(self.registry.attach(handle, surface)?)
    }

    pub fn detach_surface(&self) -> bool {
        let handle = self.snapshot.read().surface_handle;
        handle.is_some_and(|h| self.registry.detach(h))
    }
}

/// Everything that exists between `initialize` and `dispose`.
struct ActiveSession {
    capture: CaptureConfig,
    pipeline: Arc<Mutex<Pipeline>>,
    compositor: Arc<Compositor>,
    tracker: Arc<FaceTracker>,
    surface: u64,
}

struct Actor {
    backend: Arc<dyn CameraBackend>,
    config: EffectsConfig,
    library: Arc<dyn MediaLibrary>,
    detector: DetectorFactory,
    events: Arc<EventEmitter>,
    registry: Arc<SurfaceRegistry>,
    snapshot: Arc<RwLock<SessionSnapshot>>,
    state: SessionState,
    session: Option<ActiveSession>,
    notice_tx: mpsc::UnboundedSender<PipelineNotice>,
    notice_rx: mpsc::UnboundedReceiver<PipelineNotice>,
}

enum Input {
    Notice(PipelineNotice),
    Command(Option<Command>),
}

/// Run `f` on the blocking pool, failing with a timeout after `limit`.
async fn blocking<T, F>(operation: &'static str, limit: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => {
            error!(operation, "blocking task failed: {join}");
            Err(SessionError::HardwareUnavailable(format!("{operation} failed: {join}")))
        }
        Err(_) => {
            warn!(operation, limit_ms = limit.as_millis() as u64, "operation timed out");
            Err(SessionError::Timeout {
                operation,
                after: limit,
            })
        }
    }
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!("session controller running");
        loop {
            let input = tokio::select! {
                biased;
                Some(notice) = self.notice_rx.recv() => Input::Notice(notice),
                command = commands.recv() => Input::Command(command),
            };
            match input {
                Input::Notice(notice) => self.on_notice(notice).await,
                Input::Command(Some(command)) => self.handle(command).await,
                Input::Command(None) => break,
            }
        }
        if let Err(e) = self.dispose().await {
            warn!("cleanup after last handle dropped: {e}");
        }
        debug!("session controller stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Initialize(capture, reply) => {
                let _ = reply.send(self.initialize(*capture).await);
            }
            Command::StartPreview(reply) => {
                let _ = reply.send(self.start_preview().await);
            }
            Command::StopPreview(reply) => {
                let _ = reply.send(self.stop_preview().await);
            }
            Command::SwitchCamera(lens, reply) => {
                let _ = reply.send(self.switch_camera(lens).await);
            }
            Command::SetFilter(spec, reply) => {
                let _ = reply.send(self.set_filter(*spec).await);
            }
            Command::SetEffect(spec, reply) => {
                let _ = reply.send(self.set_effect(*spec).await);
            }
            Command::ClearEffect(reply) => {
                let _ = reply.send(self.clear_effect());
            }
            Command::SetZoom(zoom, reply) => {
                let _ = reply.send(self.set_zoom(zoom).await);
            }
            Command::SetFlash(mode, reply) => {
                let _ = reply.send(self.set_flash(mode).await);
            }
            Command::SetFaceDetection(enabled, reply) => {
                let _ = reply.send(self.set_face_detection(enabled));
            }
            Command::TakePhoto(options, reply) => {
                let _ = reply.send(self.take_photo(options).await);
            }
            Command::StartRecording(options, reply) => {
                let _ = reply.send(self.start_recording(options).await);
            }
            Command::StopRecording(save, reply) => {
                let _ = reply.send(self.stop_recording(save).await);
            }
            Command::Diagnostics(reply) => {
                let _ = reply.send(self.diagnostics().await);
            }
            Command::Dispose(reply) => {
                let _ = reply.send(self.dispose().await);
            }
        }
    }

    fn timeout(&self) -> Duration {
        self.config.operation_timeout()
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        debug_assert!(from.can_transition(to), "{from} -> {to}");
        self.state = to;
        self.snapshot.write().state = to;
        info!(%from, %to, "session state changed");
        self.events.emit(SessionEvent::StateChanged { from, to });
    }

    fn active(&self) -> Result<&ActiveSession> {
        match &self.session {
            Some(session) if self.state.is_active() => Ok(session),
            _ => Err(SessionError::NotInitialized),
        }
    }

    /// Run `f` against the pipeline on the blocking pool.
    async fn on_pipeline<T, F>(&self, operation: &'static str, limit: Duration, f: F) -> Result<T>
    where
        F: FnOnce(&mut Pipeline) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pipeline = Arc::clone(&self.active()?.pipeline);
        blocking(operation, limit, move || {
            let mut guard = pipeline.lock();
            f(&mut guard)
        })
        .await
    }

    fn notifier(&self) -> Notifier {
        let tx = self.notice_tx.clone();
        Arc::new(move |notice| {
            // The controller outlives every pipeline it owns.
            let _ = tx.send(notice);
        })
    }

    async fn initialize(&mut self, capture: CaptureConfig) -> Result<InitializeResult> {
        if self.state.is_active() {
            return Err(SessionError::StateConflict {
                operation: "initialize",
                state: self.state,
            });
        }
        capture.validate().map_err(SessionError::InvalidArguments)?;
        self.events.reopen();

        let face_events = Arc::clone(&self.events);
        let on_face: FaceCallback = Arc::new(move |event| {
            face_events.emit(match event {
                FaceEvent::Detected { count } => SessionEvent::FaceDetected { count },
                FaceEvent::Lost => SessionEvent::FaceLost,
            })
        });
        let tracker = FaceTracker::spawn(
            (self.detector)(),
            TrackerOptions {
                input_width: self.config.tracker_input_width,
                max_age: self.config.landmark_max_age(),
            },
            Some(on_face),
        )
        .map_err(|e| SessionError::HardwareUnavailable(format!("face tracker: {e}")))?;
        tracker.set_enabled(capture.face_detection);
        let tracker = Arc::new(tracker);

        let surface = self.registry.allocate();
        let lost_events = Arc::clone(&self.events);
        let on_lost: SurfaceLostCallback =
            Arc::new(move |handle| lost_events.emit(SessionEvent::SurfaceLost { handle }));
        let preview = Arc::new(PreviewSink::new(surface, Arc::clone(&self.registry), Some(on_lost)));
        let compositor = Arc::new(Compositor::new());

        let pipeline = Pipeline::new(
            Arc::clone(&self.backend),
            &capture,
            self.config.clone(),
            PipelineParts {
                compositor: Arc::clone(&compositor),
                tracker: Arc::clone(&tracker),
                preview,
                notify: self.notifier(),
            },
        );
        let pipeline = Arc::new(Mutex::new(pipeline));

        // Resolve the camera now so a missing lens fails here, not at preview.
        let (lens, zoom) = (capture.lens, capture.zoom);
        let resolved = {
            let pipeline = Arc::clone(&pipeline);
            blocking("initialize", self.timeout(), move || {
                let mut pipeline = pipeline.lock();
                pipeline.switch_lens(lens)?;
                Ok(pipeline.set_zoom(zoom))
            })
            .await
        };
        let zoom = match resolved {
            Ok(zoom) => zoom,
            Err(e) => {
                warn!(?lens, "initialize failed: {e}");
                self.registry.release(surface);
                let tracker = Arc::clone(&tracker);
                let _ = tokio::task::spawn_blocking(move || tracker.shutdown()).await;
                return Err(e);
            }
        };

        let resolution = capture.resolution();
        {
            let mut snapshot = self.snapshot.write();
            *snapshot = SessionSnapshot {
                state: snapshot.state,
                surface_handle: Some(surface),
                resolution: Some(resolution),
                lens: Some(lens),
                zoom,
                flash_mode: capture.flash_mode,
                face_detection: capture.face_detection,
                filter_id: None,
                effect_id: None,
            };
        }
        self.session = Some(ActiveSession {
            capture,
            pipeline,
            compositor,
            tracker,
            surface,
        });
        self.transition(SessionState::Initialized);
        Ok(InitializeResult {
            surface_handle: surface,
            width: resolution.width,
            height: resolution.height,
        })
    }

    async fn start_preview(&mut self) -> Result<()> {
        self.active()?;
        if self.state == SessionState::Recording {
            return Err(SessionError::StateConflict {
                operation: "startPreview",
                state: self.state,
            });
        }
        // Also restarts a previewing pipeline whose camera went away.
        self.on_pipeline("startPreview", self.timeout(), |p| Ok(p.start(true)?))
            .await?;
        if self.state == SessionState::Initialized {
            self.transition(SessionState::Previewing);
        }
        Ok(())
    }

    async fn stop_preview(&mut self) -> Result<()> {
        self.active()?;
        match self.state {
            SessionState::Previewing => {}
            SessionState::Recording => {
                return Err(SessionError::StateConflict {
                    operation: "stopPreview",
                    state: self.state,
                })
            }
            _ => return Err(SessionError::NotPreviewing),
        }
        let leftover = self
            .on_pipeline("stopPreview", self.timeout(), |p| Ok(p.stop()))
            .await?;
        if let Some(recorder) = leftover {
            // Only possible if an auto-stopped recording raced the stop.
            self.finish_recorder(recorder, false, StopReason::MaxDuration).await;
        }
        self.transition(SessionState::Initialized);
        Ok(())
    }

    async fn switch_camera(&mut self, lens: Lens) -> Result<()> {
        let zoom = self
            .on_pipeline("switchCamera", self.timeout(), move |p| {
                p.switch_lens(lens)?;
                Ok(p.zoom())
            })
            .await?;
        let mut snapshot = self.snapshot.write();
        snapshot.lens = Some(lens);
        snapshot.zoom = zoom;
        Ok(())
    }

    async fn set_filter(&mut self, spec: FilterSpec) -> Result<()> {
        let compositor = Arc::clone(&self.active()?.compositor);
        let id = spec.id.clone();
        blocking("setFilter", self.timeout(), move || Ok(compositor.set_filter(spec)?)).await?;
        self.snapshot.write().filter_id = Some(id);
        Ok(())
    }

    async fn set_effect(&mut self, spec: EffectSpec) -> Result<()> {
        let session = self.active()?;
        let enable_tracking = spec.needs_landmarks() && !session.tracker.is_enabled();
        if enable_tracking && self.config.face_detection_policy == FaceDetectionPolicy::Reject {
            return Err(SessionError::RequiresFaceDetection(spec.id));
        }
        let compositor = Arc::clone(&session.compositor);
        let tracker = Arc::clone(&session.tracker);
        let id = spec.id.clone();
        blocking("setAREffect", self.timeout(), move || Ok(compositor.set_effect(spec)?)).await?;

        let mut snapshot = self.snapshot.write();
        if enable_tracking {
            info!(effect = %id, "enabling face detection for effect");
            tracker.set_enabled(true);
            snapshot.face_detection = true;
        }
        snapshot.effect_id = Some(id);
        Ok(())
    }

    fn clear_effect(&mut self) -> Result<()> {
        let cleared = self.active()?.compositor.clear_effect();
        debug!(cleared, "effect cleared");
        self.snapshot.write().effect_id = None;
        Ok(())
    }

    async fn set_zoom(&mut self, zoom: f32) -> Result<()> {
        if !zoom.is_finite() {
            return Err(SessionError::invalid(format!("zoom must be a finite number, got {zoom}")));
        }
        let applied = self
            .on_pipeline("setZoom", self.timeout(), move |p| Ok(p.set_zoom(zoom)))
            .await?;
        self.snapshot.write().zoom = applied;
        Ok(())
    }

    async fn set_flash(&mut self, mode: FlashMode) -> Result<()> {
        self.on_pipeline("setFlashMode", self.timeout(), move |p| Ok(p.set_flash(mode)?))
            .await?;
        self.snapshot.write().flash_mode = mode;
        Ok(())
    }

    fn set_face_detection(&mut self, enabled: bool) -> Result<()> {
        self.active()?.tracker.set_enabled(enabled);
        self.snapshot.write().face_detection = enabled;
        Ok(())
    }

    async fn take_photo(&mut self, options: PhotoOptions) -> Result<CaptureResult> {
        let timeout = self.timeout();
        let stages = options.stages;
        // A stopped pipeline is started for the shot, so allow for both.
        let frame = self
            .on_pipeline("takePhoto", timeout * 2, move |p| Ok(p.capture_frame(stages, timeout)?))
            .await?;
        let quality = self.config.jpeg_quality;
        let library = Arc::clone(&self.library);
        blocking("takePhoto", timeout, move || {
            let library = options.save_to_gallery.then_some(library.as_ref());
            Ok(store_photo(&frame, &options, quality, library)?)
        })
        .await
    }

    async fn start_recording(&mut self, options: RecordingOptions) -> Result<()> {
        let session = self.active()?;
        match self.state {
            SessionState::Previewing => {}
            SessionState::Recording => {
                return Err(SessionError::StateConflict {
                    operation: "startRecording",
                    state: self.state,
                })
            }
            _ => return Err(SessionError::NotPreviewing),
        }
        let path = options
            .path
            .clone()
            .unwrap_or_else(|| self.config.output_dir.join(media_file_name("VID", "avi")));
        let want_audio = session.capture.audio;
        let fps = session.capture.fps;
        let quality = self.config.jpeg_quality;

        self.on_pipeline("startRecording", self.timeout(), move |p| {
            let audio = if want_audio {
                p.open_audio().unwrap_or_else(|e| {
                    warn!("recording without audio: {e}");
                    None
                })
            } else {
                None
            };
            let recorder = Recorder::create(path, p.resolution(), fps, quality, audio, options)?;
            p.attach_recorder(Box::new(recorder))?;
            Ok(())
        })
        .await?;
        self.transition(SessionState::Recording);
        Ok(())
    }

    async fn stop_recording(&mut self, save_to_gallery: bool) -> Result<RecordingResult> {
        self.active()?;
        if self.state != SessionState::Recording {
            return Err(SessionError::NotRecording);
        }
        let detached = self
            .on_pipeline("stopRecording", self.timeout(), |p| Ok(p.detach_recorder()))
            .await?;
        let recorder = match detached {
            Some(recorder) => Some(recorder),
            // The worker may have handed it back on its own just now.
            None => self.take_ended_recorder().await,
        };
        let Some(recorder) = recorder else {
            self.transition(SessionState::Previewing);
            return Err(SessionError::NotRecording);
        };
        let library = Arc::clone(&self.library);
        let finished = blocking("stopRecording", self.timeout(), move || {
            let result = recorder.finish()?;
            if save_to_gallery {
                library.save_video(Path::new(&result.path))?;
            }
            Ok(result)
        })
        .await;
        self.transition(SessionState::Previewing);
        let result = finished?;
        self.events.emit(SessionEvent::RecordingStopped {
            reason: StopReason::Requested,
            result: result.clone(),
        });
        Ok(result)
    }

    /// Pull a recorder the worker gave back out of the notice queue,
    /// handling any other notices queued ahead of it.
    async fn take_ended_recorder(&mut self) -> Option<Box<Recorder>> {
        let mut found = None;
        while let Ok(notice) = self.notice_rx.try_recv() {
            match notice {
                PipelineNotice::RecordingEnded { recorder, reason } if found.is_none() => {
                    debug!(?reason, "recorder already returned by worker");
                    found = Some(recorder);
                }
                other => self.on_notice(other).await,
            }
        }
        found
    }

    async fn diagnostics(&mut self) -> Result<DiagnosticSnapshot> {
        self.on_pipeline("getDiagnostics", self.timeout(), |p| Ok(p.diagnostics()))
            .await
    }

    async fn on_notice(&mut self, notice: PipelineNotice) {
        match notice {
            PipelineNotice::HardwareUnavailable { message, fatal } => {
                if fatal {
                    error!(state = %self.state, "camera lost: {message}");
                } else {
                    warn!("camera degraded: {message}");
                }
                self.events.emit(SessionEvent::Error {
                    code: "hardware-unavailable".into(),
                    message,
                });
            }
            PipelineNotice::Progress { duration } => {
                if self.state == SessionState::Recording {
                    self.events.emit(SessionEvent::RecordingProgress {
                        duration_ms: duration.as_millis() as u64,
                    });
                }
            }
            PipelineNotice::RecordingEnded { recorder, reason } => {
                let stop = match &reason {
                    RecordingEnd::Limit => StopReason::MaxDuration,
                    RecordingEnd::Failed(message) => {
                        self.events.emit(SessionEvent::Error {
                            code: "io-failure".into(),
                            message: message.clone(),
                        });
                        StopReason::WriteFailed
                    }
                };
                if self.state == SessionState::Recording {
                    self.transition(SessionState::Previewing);
                }
                self.finish_recorder(recorder, false, stop).await;
            }
        }
    }

    /// Finalize a recorder outside `stopRecording`, reporting the outcome
    /// as events.
    async fn finish_recorder(&mut self, recorder: Box<Recorder>, save_to_gallery: bool, reason: StopReason) {
        let library = Arc::clone(&self.library);
        let finished = blocking("finishRecording", self.timeout(), move || {
            let result = recorder.finish()?;
            if save_to_gallery {
                library.save_video(Path::new(&result.path))?;
            }
            Ok(result)
        })
        .await;
        match finished {
            Ok(result) => {
                info!(?reason, path = %result.path, "recording stopped");
                self.events.emit(SessionEvent::RecordingStopped { reason, result });
            }
            Err(e) => {
                error!("failed to finalize recording: {e}");
                self.events.emit(SessionEvent::Error {
                    code: e.code().into(),
                    message: e.to_string(),
                });
            }
        }
    }

    /// Release the frame source, then the surface, then the recorder, then
    /// the tracker. Idempotent; the event stream closes at the end.
    async fn dispose(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            if self.state == SessionState::Uninitialized {
                self.transition(SessionState::Disposed);
                self.events.close();
            }
            return Ok(());
        };
        info!(state = %self.state, "disposing session");
        let mut failures = Vec::new();

        let pipeline = Arc::clone(&session.pipeline);
        let leftover = match blocking("dispose", self.timeout(), move || Ok(pipeline.lock().stop())).await {
            Ok(recorder) => recorder,
            Err(e) => {
                failures.push(format!("frame source: {e}"));
                None
            }
        };

        self.registry.release(session.surface);

        let mut recorders: Vec<Box<Recorder>> = leftover.into_iter().collect();
        while let Ok(notice) = self.notice_rx.try_recv() {
            if let PipelineNotice::RecordingEnded { recorder, .. } = notice {
                recorders.push(recorder);
            }
        }
        for recorder in recorders {
            let finished = blocking("dispose", self.timeout(), move || Ok(recorder.finish()?)).await;
            match finished {
                Ok(result) => self.events.emit(SessionEvent::RecordingStopped {
                    reason: StopReason::Disposed,
                    result,
                }),
                Err(e) => failures.push(format!("recorder: {e}")),
            }
        }

        let tracker = Arc::clone(&session.tracker);
        if let Err(e) = tokio::task::spawn_blocking(move || tracker.shutdown()).await {
            failures.push(format!("face tracker: {e}"));
        }
        session.compositor.clear_filter();
        session.compositor.clear_effect();
        drop(session);

        self.transition(SessionState::Disposed);
        {
            let mut snapshot = self.snapshot.write();
            *snapshot = SessionSnapshot {
                state: SessionState::Disposed,
                ..SessionSnapshot::default()
            };
        }
        self.events.close();

        if failures.is_empty() {
            info!("session disposed");
            Ok(())
        } else {
            Err(SessionError::DisposeFailure(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::dummy::{DummyBackend, DummyOptions};
    use crate::camera::types::ResolutionPreset;
    use crate::effects::effect::EffectKind;
    use crate::effects::filter::FilterKind;
    use tempfile::TempDir;

    fn small_capture() -> CaptureConfig {
        CaptureConfig {
            custom_resolution: Some(Resolution::new(64, 48)),
            ..CaptureConfig::default()
        }
    }

    fn spawn(dir: &TempDir, options: DummyOptions) -> SessionHandle {
        let config = EffectsConfig {
            output_dir: dir.path().join("out"),
            gallery_dir: dir.path().join("gallery"),
            ..EffectsConfig::default()
        };
        let backend = Arc::new(DummyBackend::with_options(DummyOptions {
            frame_interval: Some(Duration::from_millis(5)),
            ..options
        }));
        SessionController::new(backend, config).spawn()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn operations_before_initialize_fail() {
        let dir = TempDir::new().unwrap();
        let session = spawn(&dir, DummyOptions::default());
        assert_eq!(session.start_preview().await, Err(SessionError::NotInitialized));
        assert_eq!(session.set_zoom(2.0).await, Err(SessionError::NotInitialized));
        assert_eq!(
            session.stop_recording(false).await.unwrap_err().code(),
            "not-initialized"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn initialize_reports_surface_and_size() {
        let dir = TempDir::new().unwrap();
        let session = spawn(&dir, DummyOptions::default());
        let capture = CaptureConfig {
            preset: ResolutionPreset::Medium,
            ..CaptureConfig::default()
        };
        let result = session.initialize(capture).await.unwrap();
        assert_eq!((result.width, result.height), (640, 480));
        assert_eq!(session.snapshot().surface_handle, Some(result.surface_handle));
        assert_eq!(session.state(), SessionState::Initialized);

        let again = session.initialize(CaptureConfig::default()).await.unwrap_err();
        assert_eq!(again.code(), "state-conflict");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_capture_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let session = spawn(&dir, DummyOptions::default());
        let capture = CaptureConfig {
            fps: 0,
            ..CaptureConfig::default()
        };
        let err = session.initialize(capture).await.unwrap_err();
        assert_eq!(err.code(), "invalid-arguments");
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_camera_is_hardware_unavailable() {
        let dir = TempDir::new().unwrap();
        let session = SessionController::new(
            Arc::new(crate::NullBackend),
            EffectsConfig {
                output_dir: dir.path().to_path_buf(),
                ..EffectsConfig::default()
            },
        )
        .spawn();
        let err = session.initialize(CaptureConfig::default()).await.unwrap_err();
        assert_eq!(err.code(), "hardware-unavailable");
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn preview_state_rules() {
        let dir = TempDir::new().unwrap();
        let session = spawn(&dir, DummyOptions::default());
        session.initialize(small_capture()).await.unwrap();
        assert_eq!(session.stop_preview().await, Err(SessionError::NotPreviewing));
        assert_eq!(
            session.start_recording(RecordingOptions::default()).await,
            Err(SessionError::NotPreviewing)
        );

        session.start_preview().await.unwrap();
        session.start_preview().await.unwrap();
        session.start_recording(RecordingOptions::default()).await.unwrap();
        assert_eq!(session.stop_preview().await.unwrap_err().code(), "state-conflict");

        let result = session.stop_recording(false).await.unwrap();
        assert_eq!((result.width, result.height), (64, 48));
        session.stop_preview().await.unwrap();
        assert_eq!(session.state(), SessionState::Initialized);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_lut_file_and_bad_shader_fail_cleanly() {
        let dir = TempDir::new().unwrap();
        let session = spawn(&dir, DummyOptions::default());
        session.initialize(small_capture()).await.unwrap();

        let mut shader = FilterSpec::new("s", FilterKind::CustomShader);
        shader.shader_code = Some("r = (g +;".into());
        assert_eq!(
            session.set_filter(shader).await.unwrap_err().code(),
            "invalid-arguments"
        );
        assert_eq!(session.snapshot().filter_id, None);

        let mut lut = FilterSpec::new("l", FilterKind::LookupTable);
        lut.lut_path = Some("/definitely/missing/warm.cube".into());
        session.set_filter(lut).await.unwrap();
        assert_eq!(session.snapshot().filter_id.as_deref(), Some("l"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auto_enable_policy_turns_tracking_on() {
        let dir = TempDir::new().unwrap();
        let config = EffectsConfig {
            face_detection_policy: FaceDetectionPolicy::AutoEnable,
            output_dir: dir.path().to_path_buf(),
            ..EffectsConfig::default()
        };
        let session = SessionController::new(Arc::new(DummyBackend::new()), config).spawn();
        session.initialize(small_capture()).await.unwrap();
        session
            .set_ar_effect(EffectSpec::new("warp", EffectKind::FaceWarp))
            .await
            .unwrap();
        assert!(session.snapshot().face_detection);
        assert_eq!(session.snapshot().effect_id.as_deref(), Some("warp"));

        session.clear_ar_effect().await.unwrap();
        assert_eq!(session.snapshot().effect_id, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn zoom_and_flash_are_reflected_in_snapshot() {
        let dir = TempDir::new().unwrap();
        let session = spawn(&dir, DummyOptions::default());
        session.initialize(small_capture()).await.unwrap();
        session.start_preview().await.unwrap();

        session.set_zoom(3.0).await.unwrap();
        session.set_flash_mode(FlashMode::Torch).await.unwrap();
        session.switch_camera(Lens::Front).await.unwrap();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.lens, Some(Lens::Front));
        assert_eq!(snapshot.zoom, 3.0);
        assert_eq!(snapshot.flash_mode, FlashMode::Torch);

        session.set_zoom(50.0).await.unwrap();
        assert_eq!(session.snapshot().zoom, 4.0);
        assert_eq!(
            session.set_zoom(f32::NAN).await.unwrap_err().code(),
            "invalid-arguments"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn max_duration_stops_recording_on_its_own() {
        let dir = TempDir::new().unwrap();
        let session = spawn(&dir, DummyOptions::default());
        let mut events = {
            session.initialize(small_capture()).await.unwrap();
            session.subscribe()
        };
        session.start_preview().await.unwrap();
        let options = RecordingOptions {
            max_duration: Some(Duration::from_millis(100)),
            ..RecordingOptions::default()
        };
        session.start_recording(options).await.unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::RecordingStopped { reason, result }) => break (reason, result),
                    Ok(_) => continue,
                    Err(e) => panic!("event stream ended: {e}"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(stopped.0, StopReason::MaxDuration);
        assert!(stopped.1.duration_ms >= 100);
        assert!(Path::new(&stopped.1.path).exists());
        assert_eq!(session.state(), SessionState::Previewing);
        assert_eq!(session.stop_recording(false).await, Err(SessionError::NotRecording));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fatal_camera_error_is_reported_as_event() {
        let dir = TempDir::new().unwrap();
        let options = DummyOptions {
            disconnect_after: Some(2),
            ..DummyOptions::default()
        };
        let session = spawn(&dir, options);
        session.initialize(small_capture()).await.unwrap();
        let mut events = session.subscribe();
        session.start_preview().await.unwrap();

        let error = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(SessionEvent::Error { code, .. }) = events.recv().await {
                    break code;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(error, "hardware-unavailable");
        assert_eq!(session.state(), SessionState::Previewing);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispose_finalizes_active_recording() {
        let dir = TempDir::new().unwrap();
        let session = spawn(&dir, DummyOptions::default());
        session.initialize(small_capture()).await.unwrap();
        session.start_preview().await.unwrap();
        let path = dir.path().join("rec.avi");
        let options = RecordingOptions {
            path: Some(path.clone()),
            ..RecordingOptions::default()
        };
        session.start_recording(options).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        session.dispose().await.unwrap();
        assert!(path.exists());
        assert_eq!(session.state(), SessionState::Disposed);
        session.dispose().await.unwrap();

        // A new session can start after dispose.
        session.initialize(small_capture()).await.unwrap();
        assert_eq!(session.state(), SessionState::Initialized);
    }
}
