use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::effects::compositor::Stages;
use crate::frame::FrameBuffer;
use crate::output::recorder::Recorder;
use crate::pipeline::queue::Pop;
use crate::pipeline::{PipelineNotice, PipelineShared, RecordingEnd};

/// How long the worker waits on an empty queue before checking messages.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub(crate) enum WorkerMessage {
    Photo {
        stages: Stages,
        reply: SyncSender<FrameBuffer>,
    },
    AttachRecorder(Box<Recorder>),
    DetachRecorder(SyncSender<Option<Box<Recorder>>>),
}

/// The compositor thread: pulls frames off the queue, runs the tracker and
/// compositor, and fans results out to preview, photo and recording.
pub(crate) struct Worker {
    tx: Sender<WorkerMessage>,
    thread: Option<JoinHandle<Option<Box<Recorder>>>>,
}

impl Worker {
    pub fn spawn(shared: Arc<PipelineShared>, recorder: Option<Box<Recorder>>) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("compositor".into())
            .spawn(move || run(shared, rx, recorder))?;
        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    /// Returns false when the worker has already exited.
    pub fn send(&self, message: WorkerMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Wait for the thread to exit. The queue must be closed first.
    pub fn join(mut self) -> Option<Box<Recorder>> {
        let handle = self.thread.take()?;
        match handle.join() {
            Ok(recorder) => recorder,
            Err(_) => {
                error!("compositor thread panicked");
                None
            }
        }
    }
}

struct PendingPhoto {
    stages: Stages,
    reply: SyncSender<FrameBuffer>,
}

struct State {
    shared: Arc<PipelineShared>,
    photos: Vec<PendingPhoto>,
    recorder: Option<Box<Recorder>>,
    last_progress: Duration,
}

fn run(shared: Arc<PipelineShared>, rx: Receiver<WorkerMessage>, recorder: Option<Box<Recorder>>) -> Option<Box<Recorder>> {
    debug!("compositor thread starting");
    let mut state = State {
        shared,
        photos: Vec::new(),
        recorder,
        last_progress: Duration::ZERO,
    };
    let mut inbox_open = true;

    loop {
        while inbox_open {
            match rx.try_recv() {
                Ok(message) => state.handle(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => inbox_open = false,
            }
        }
        match state.shared.queue.pop_timeout(POLL_INTERVAL) {
            Pop::Frame(frame) => state.process(frame),
            Pop::Timeout => {}
            Pop::Closed => break,
        }
    }

    debug!(pending_photos = state.photos.len(), "compositor thread exiting");
    state.recorder
}

impl State {
    fn handle(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Photo { stages, reply } => self.photos.push(PendingPhoto { stages, reply }),
            WorkerMessage::AttachRecorder(recorder) => {
                if self.recorder.is_some() {
                    warn!("recorder already attached, replacing");
                }
                self.last_progress = Duration::ZERO;
                self.recorder = Some(recorder);
            }
            WorkerMessage::DetachRecorder(reply) => {
                let _ = reply.send(self.recorder.take());
            }
        }
    }

    fn process(&mut self, frame: FrameBuffer) {
        let tracker = &self.shared.tracker;
        tracker.submit(&frame);
        let landmarks = tracker.landmarks_for(frame.timestamp_us, frame.resolution());
        let captured_at = Duration::from_micros(frame.timestamp_us);

        // Each distinct stage selection is composited once per frame.
        let mut wanted: Vec<Stages> = Vec::with_capacity(3);
        let preview = self.shared.preview_enabled();
        if preview {
            wanted.push(Stages::ALL);
        }
        wanted.extend(self.photos.iter().map(|p| p.stages));
        if let Some(recorder) = &self.recorder {
            wanted.push(recorder.stages());
        }
        if wanted.is_empty() {
            return;
        }
        let mut outputs: Vec<(Stages, FrameBuffer)> = Vec::with_capacity(wanted.len());
        for stages in wanted {
            if outputs.iter().any(|(s, _)| *s == stages) {
                continue;
            }
            let composed = self
                .shared
                .compositor
                .apply(frame.clone(), stages, landmarks.as_ref());
            outputs.push((stages, composed));
        }
        let find = |stages: Stages| outputs.iter().find(|(s, _)| *s == stages).map(|(_, f)| f);

        for photo in self.photos.drain(..) {
            if let Some(composed) = find(photo.stages) {
                let _ = photo.reply.send(composed.clone());
            }
        }

        if let Some(mut recorder) = self.recorder.take() {
            match find(recorder.stages()).map(|f| recorder.write_frame(f)) {
                Some(Err(e)) => {
                    error!("recording write failed: {e}");
                    (self.shared.notify)(PipelineNotice::RecordingEnded {
                        recorder,
                        reason: RecordingEnd::Failed(e.to_string()),
                    });
                }
                _ if recorder.reached_limit() => {
                    (self.shared.notify)(PipelineNotice::RecordingEnded {
                        recorder,
                        reason: RecordingEnd::Limit,
                    });
                }
                _ => {
                    let duration = recorder.duration();
                    if duration >= self.last_progress + self.shared.config.progress_interval() {
                        self.last_progress = duration;
                        (self.shared.notify)(PipelineNotice::Progress { duration });
                    }
                    self.recorder = Some(recorder);
                }
            }
        }

        let latency = self.shared.epoch.elapsed().saturating_sub(captured_at);
        self.shared.stats.lock().record_composited(latency);

        if preview {
            if let Some(pos) = outputs.iter().position(|(s, _)| *s == Stages::ALL) {
                let (_, composed) = outputs.swap_remove(pos);
                self.shared.preview.publish(composed);
            }
        }
    }
}
