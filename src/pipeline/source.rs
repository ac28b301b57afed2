use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::camera::backend::{CameraBackend, CaptureDevice};
use crate::camera::convert::to_rgba;
use crate::camera::error::{CameraError, Result};
use crate::camera::types::{CameraDevice, FlashMode, Lens, StreamRequest};
use crate::frame::FrameBuffer;
use crate::pipeline::{PipelineNotice, PipelineShared};

enum SourceCommand {
    /// Replace the open device with one the caller already opened.
    Swap(Box<dyn CaptureDevice>),
    /// Close the current device first, then open `Lens`. For backends that
    /// cannot hold two cameras open at once.
    Reopen(Lens, SyncSender<Result<CameraDevice>>),
    Flash(FlashMode, SyncSender<Result<()>>),
}

/// Owns the capture thread: reads, converts, scales and queues frames.
pub struct FrameSource {
    backend: Arc<dyn CameraBackend>,
    request: StreamRequest,
    lens: Lens,
    flash: FlashMode,
    device: Option<CameraDevice>,
    running: Arc<AtomicBool>,
    commands: Option<Sender<SourceCommand>>,
    thread: Option<JoinHandle<()>>,
}

/// Apply a flash mode, tolerating devices without a flash unit.
fn apply_flash(device: &mut dyn CaptureDevice, mode: FlashMode) -> Result<()> {
    match device.set_flash(mode) {
        Err(CameraError::Unsupported(reason)) => {
            warn!(device = %device.device().id, ?mode, "flash not applied: {reason}");
            Ok(())
        }
        other => other,
    }
}

impl FrameSource {
    pub fn new(backend: Arc<dyn CameraBackend>, request: StreamRequest, lens: Lens, flash: FlashMode) -> Self {
        Self {
            backend,
            request,
            lens,
            flash,
            device: None,
            running: Arc::new(AtomicBool::new(false)),
            commands: None,
            thread: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some() && self.running.load(Ordering::Acquire)
    }

    pub fn lens(&self) -> Lens {
        self.lens
    }

    pub fn flash(&self) -> FlashMode {
        self.flash
    }

    /// The device currently open, or last opened.
    pub fn device(&self) -> Option<&CameraDevice> {
        self.device.as_ref()
    }

    pub fn backend(&self) -> &Arc<dyn CameraBackend> {
        &self.backend
    }

    /// Open the camera and start the capture thread. No-op when running.
    pub fn start(&mut self, shared: Arc<PipelineShared>) -> std::result::Result<(), crate::pipeline::PipelineError> {
        if self.is_running() {
            return Ok(());
        }
        // A previous thread may have ended on its own after a fatal error.
        self.stop();

        let mut device = self.backend.open(self.lens, &self.request)?;
        if self.flash != FlashMode::Off {
            apply_flash(device.as_mut(), self.flash)?;
        }
        self.device = Some(device.device().clone());

        let (tx, rx) = mpsc::channel();
        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let backend = Arc::clone(&self.backend);
        let request = self.request;
        let spawned = std::thread::Builder::new()
            .name("frame-source".into())
            .spawn(move || capture_loop(device, rx, running, backend, request, shared));
        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                self.commands = Some(tx);
                info!(lens = ?self.lens, "frame source started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(crate::pipeline::PipelineError::Spawn(e))
            }
        }
    }

    /// Stop the capture thread and close the device. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.commands.take();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("frame source thread panicked");
            }
            info!(lens = ?self.lens, "frame source stopped");
        }
    }

    /// Switch cameras. While running, the new camera is opened before the
    /// old one closes so the stream continues without a gap.
    pub fn switch_lens(&mut self, lens: Lens, timeout: Duration) -> Result<()> {
        if !self.is_running() {
            let devices = self.backend.enumerate_devices()?;
            let device = devices
                .into_iter()
                .find(|d| d.lens == lens)
                .ok_or_else(|| CameraError::DeviceNotFound(format!("{lens:?} camera")))?;
            self.device = Some(device);
            self.lens = lens;
            return Ok(());
        }

        match self.backend.open(lens, &self.request) {
            Ok(mut device) => {
                if self.flash != FlashMode::Off {
                    apply_flash(device.as_mut(), self.flash)?;
                }
                self.device = Some(device.device().clone());
                self.send(SourceCommand::Swap(device))?;
            }
            Err(CameraError::Busy(reason)) => {
                debug!(?lens, "camera busy while another is open ({reason}), reopening in place");
                let (reply_tx, reply_rx) = mpsc::sync_channel(1);
                self.send(SourceCommand::Reopen(lens, reply_tx))?;
                let device = reply_rx
                    .recv_timeout(timeout)
                    .map_err(|_| CameraError::Timeout(timeout))??;
                self.device = Some(device);
            }
            Err(e) => return Err(e),
        }
        info!(?lens, "switched camera");
        self.lens = lens;
        Ok(())
    }

    /// Set the flash mode, applied to the running device and remembered for
    /// later opens. Cameras without a flash accept and ignore it.
    pub fn set_flash(&mut self, mode: FlashMode, timeout: Duration) -> Result<()> {
        self.flash = mode;
        if !self.is_running() {
            return Ok(());
        }
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.send(SourceCommand::Flash(mode, reply_tx))?;
        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(CameraError::Timeout(timeout)),
            // The thread ended; the mode applies on the next start.
            Err(mpsc::RecvTimeoutError::Disconnected) => Ok(()),
        }
    }

    fn send(&self, command: SourceCommand) -> Result<()> {
        self.commands
            .as_ref()
            .and_then(|tx| tx.send(command).ok())
            .ok_or_else(|| CameraError::Disconnected("frame source not running".into()))
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Consecutive dropped frames. Reports hardware-unavailable once per streak.
struct FailureStreak {
    count: u32,
    limit: u32,
    reported: bool,
}

impl FailureStreak {
    fn new(limit: u32) -> Self {
        Self {
            count: 0,
            limit: limit.max(1),
            reported: false,
        }
    }

    fn fail(&mut self, shared: &PipelineShared, err: &CameraError) {
        {
            let mut stats = shared.stats.lock();
            stats.record_failure();
            if matches!(err, CameraError::CorruptFrame(_)) {
                stats.record_corrupt();
            }
        }
        self.count += 1;
        debug!(failures = self.count, "dropped frame: {err}");
        if self.count >= self.limit && !self.reported {
            self.reported = true;
            warn!(failures = self.count, "camera keeps failing: {err}");
            (shared.notify)(PipelineNotice::HardwareUnavailable {
                message: format!("{} consecutive frame failures: {err}", self.count),
                fatal: false,
            });
        }
    }

    fn reset(&mut self) {
        self.count = 0;
        self.reported = false;
    }
}

fn capture_loop(
    mut device: Box<dyn CaptureDevice>,
    commands: Receiver<SourceCommand>,
    running: Arc<AtomicBool>,
    backend: Arc<dyn CameraBackend>,
    request: StreamRequest,
    shared: Arc<PipelineShared>,
) {
    let frame_timeout = shared.config.frame_timeout();
    let mut streak = FailureStreak::new(shared.config.max_consecutive_failures);
    let mut sequence = 0u64;
    let mut last_ts = 0u64;

    debug!(device = %device.device().id, "capture thread starting");
    while running.load(Ordering::Acquire) {
        loop {
            match commands.try_recv() {
                Ok(SourceCommand::Swap(next)) => {
                    device.close();
                    device = next;
                    streak.reset();
                }
                Ok(SourceCommand::Reopen(lens, reply)) => {
                    let previous = device.device().lens;
                    device.close();
                    match backend.open(lens, &request) {
                        Ok(next) => {
                            let info = next.device().clone();
                            device = next;
                            let _ = reply.send(Ok(info));
                        }
                        Err(e) => {
                            warn!(?lens, "reopen failed, restoring {previous:?}: {e}");
                            match backend.open(previous, &request) {
                                Ok(prev) => device = prev,
                                Err(fatal) => {
                                    let _ = reply.send(Err(e));
                                    (shared.notify)(PipelineNotice::HardwareUnavailable {
                                        message: fatal.to_string(),
                                        fatal: true,
                                    });
                                    running.store(false, Ordering::Release);
                                    return;
                                }
                            }
                            let _ = reply.send(Err(e));
                        }
                    }
                    streak.reset();
                }
                Ok(SourceCommand::Flash(mode, reply)) => {
                    let _ = reply.send(apply_flash(device.as_mut(), mode));
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    running.store(false, Ordering::Release);
                    break;
                }
            }
        }
        if !running.load(Ordering::Acquire) {
            break;
        }

        let raw = match device.read_frame(frame_timeout) {
            Ok(raw) => raw,
            Err(e) if e.is_transient() => {
                streak.fail(&shared, &e);
                continue;
            }
            Err(e) => {
                error!(device = %device.device().id, "capture ended: {e}");
                shared.stats.lock().record_failure();
                (shared.notify)(PipelineNotice::HardwareUnavailable {
                    message: e.to_string(),
                    fatal: true,
                });
                running.store(false, Ordering::Release);
                break;
            }
        };

        let frame = match to_rgba(&raw) {
            Ok(rgba) => FrameBuffer::from_rgba(raw.width, raw.height, rgba, 0)
                .map_err(|e| CameraError::CorruptFrame(e.to_string())),
            Err(e) => Err(e),
        };
        let mut frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                streak.fail(&shared, &e);
                continue;
            }
        };

        // Strictly increasing, whatever the wall clock does between frames.
        let now = shared.epoch.elapsed().as_micros() as u64;
        last_ts = now.max(last_ts + 1);
        frame.timestamp_us = last_ts;
        frame.sequence = sequence;
        sequence += 1;

        let frame = match frame.resized(shared.resolution, shared.zoom()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("frame resize failed: {e}");
                streak.fail(&shared, &CameraError::CorruptFrame(e.to_string()));
                continue;
            }
        };

        streak.reset();
        let bytes = frame.as_bytes().len();
        let evicted = shared.queue.push(frame);
        let mut stats = shared.stats.lock();
        stats.record_capture(bytes);
        if evicted {
            stats.record_drop();
        }
    }

    device.close();
    debug!("capture thread exiting");
}
