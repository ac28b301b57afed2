use std::time::Duration;

use thiserror::Error;

use crate::camera::error::CameraError;
use crate::effects::error::EffectError;
use crate::output::error::OutputError;
use crate::pipeline::PipelineError;
use crate::session::state::SessionState;

/// Errors surfaced to callers of a session, each with a stable code.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("session is not initialized")]
    NotInitialized,

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unsupported {category} kind: {kind}")]
    UnsupportedKind { category: &'static str, kind: String },

    #[error("effect {0} needs face detection, which is disabled")]
    RequiresFaceDetection(String),

    #[error("no recording in progress")]
    NotRecording,

    #[error("preview is not running")]
    NotPreviewing,

    #[error("cannot {operation} while {state}")]
    StateConflict {
        operation: &'static str,
        state: SessionState,
    },

    #[error("camera unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("dispose failed: {0}")]
    DisposeFailure(String),

    #[error("method not implemented: {0}")]
    NotImplemented(String),

    #[error("i/o failure: {0}")]
    Io(String),
}

impl SessionError {
    /// The error name reported over the method channel.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not-initialized",
            Self::InvalidArguments(_) => "invalid-arguments",
            Self::UnsupportedKind { .. } => "unsupported-kind",
            Self::RequiresFaceDetection(_) => "requires-face-detection",
            Self::NotRecording => "not-recording",
            Self::NotPreviewing => "not-previewing",
            Self::StateConflict { .. } => "state-conflict",
            Self::HardwareUnavailable(_) => "hardware-unavailable",
            Self::Timeout { .. } => "timeout",
            Self::DisposeFailure(_) => "dispose-failure",
            Self::NotImplemented(_) => "not-implemented",
            Self::Io(_) => "io-failure",
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }
}

impl From<CameraError> for SessionError {
    fn from(e: CameraError) -> Self {
        match e {
            CameraError::Timeout(after) => Self::Timeout {
                operation: "camera",
                after,
            },
            other => Self::HardwareUnavailable(other.to_string()),
        }
    }
}

impl From<EffectError> for SessionError {
    fn from(e: EffectError) -> Self {
        match e {
            EffectError::UnsupportedKind { category, kind } => Self::UnsupportedKind { category, kind },
            other => Self::InvalidArguments(other.to_string()),
        }
    }
}

impl From<OutputError> for SessionError {
    fn from(e: OutputError) -> Self {
        match e {
            OutputError::UnknownSurface(_) => Self::InvalidArguments(e.to_string()),
            other => Self::Io(other.to_string()),
        }
    }
}

impl From<PipelineError> for SessionError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Camera(camera) => camera.into(),
            PipelineError::Timeout(after) => Self::Timeout {
                operation: "capture",
                after,
            },
            PipelineError::NotRunning => Self::NotPreviewing,
            PipelineError::Spawn(source) => Self::HardwareUnavailable(source.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
