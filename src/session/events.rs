use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::output::recorder::RecordingResult;
use crate::session::state::SessionState;

/// Why a recording ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Requested,
    MaxDuration,
    WriteFailed,
    Disposed,
}

/// Unsolicited notifications pushed to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    RecordingProgress {
        duration_ms: u64,
    },
    RecordingStopped {
        reason: StopReason,
        result: RecordingResult,
    },
    FaceDetected {
        count: usize,
    },
    FaceLost,
    SurfaceLost {
        handle: u64,
    },
    Error {
        code: String,
        message: String,
    },
}

/// Fan-out of [`SessionEvent`]s to any number of subscribers.
///
/// Closing drops the sender: subscribers see the stream end and later
/// emits go nowhere. `reopen` starts a fresh stream for a new session.
pub struct EventEmitter {
    sender: RwLock<Option<broadcast::Sender<SessionEvent>>>,
    capacity: usize,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            sender: RwLock::new(Some(tx)),
            capacity,
        }
    }

    /// Receive events emitted from now on. Subscribing to a closed emitter
    /// yields a receiver that is already at end of stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        match self.sender.read().as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = self.sender.read().as_ref() {
            trace!(?event, "session event");
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }

    pub fn close(&self) {
        self.sender.write().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    pub fn reopen(&self) {
        let mut sender = self.sender.write();
        if sender.is_none() {
            *sender = Some(broadcast::channel(self.capacity).0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn serialises_with_event_tag() {
        let json = serde_json::to_value(SessionEvent::RecordingProgress { duration_ms: 1500 }).unwrap();
        assert_eq!(json["event"], "recordingProgress");
        assert_eq!(json["durationMs"], 1500);

        let json = serde_json::to_value(SessionEvent::StateChanged {
            from: SessionState::Initialized,
            to: SessionState::Previewing,
        })
        .unwrap();
        assert_eq!(json["event"], "stateChanged");
        assert_eq!(json["to"], "previewing");

        let json = serde_json::to_value(SessionEvent::FaceLost).unwrap();
        assert_eq!(json["event"], "faceLost");
    }

    #[test]
    fn subscribers_receive_emitted_events() {
        let emitter = EventEmitter::new(8);
        let mut rx = emitter.subscribe();
        emitter.emit(SessionEvent::FaceDetected { count: 2 });
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::FaceDetected { count: 2 });
    }

    #[test]
    fn close_ends_stream_and_silences_emits() {
        let emitter = EventEmitter::new(8);
        let mut rx = emitter.subscribe();
        emitter.close();
        emitter.emit(SessionEvent::FaceLost);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
        assert!(matches!(emitter.subscribe().try_recv(), Err(TryRecvError::Closed)));
    }

    #[test]
    fn reopen_starts_new_stream() {
        let emitter = EventEmitter::new(8);
        emitter.close();
        emitter.reopen();
        assert!(!emitter.is_closed());
        let mut rx = emitter.subscribe();
        emitter.emit(SessionEvent::SurfaceLost { handle: 3 });
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::SurfaceLost { handle: 3 });
    }
}
