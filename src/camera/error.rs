use std::time::Duration;

use thiserror::Error;

/// Camera subsystem errors.
#[derive(Debug, Clone, Error)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device busy: {0}")]
    Busy(String),

    #[error("camera permission revoked: {0}")]
    PermissionDenied(String),

    #[error("device disconnected: {0}")]
    Disconnected(String),

    #[error("no frame within {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("corrupt frame: {0}")]
    CorruptFrame(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("audio capture failed: {0}")]
    Audio(String),
}

impl CameraError {
    /// Whether the capture loop can keep going after this error.
    ///
    /// Per-frame faults are dropped and counted; anything else ends the
    /// capture thread.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::CorruptFrame(_))
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, CameraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_faults_are_transient() {
        assert!(CameraError::Timeout(Duration::from_millis(10)).is_transient());
        assert!(CameraError::CorruptFrame("short read".into()).is_transient());
        assert!(!CameraError::Disconnected("usb".into()).is_transient());
        assert!(!CameraError::Busy("in use".into()).is_transient());
    }

    #[test]
    fn timeout_message_reports_milliseconds() {
        let msg = CameraError::Timeout(Duration::from_millis(1500)).to_string();
        assert_eq!(msg, "no frame within 1500ms");
    }
}
