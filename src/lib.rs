//! Real-time camera effects: capture frames, track faces, composite filters
//! and AR effects, and deliver the result to preview surfaces, photos and
//! recordings. Hosts drive a session through [`channel::MethodChannel`] and
//! observe it through the session event stream.

pub mod camera;
pub mod channel;
pub mod diagnostics;
pub mod effects;
pub mod frame;
pub mod output;
pub mod pipeline;
pub mod session;
pub mod settings;
pub mod tracker;

use std::sync::Arc;

use camera::backend::{CameraBackend, CaptureDevice};
use camera::error::{CameraError, Result as CameraResult};
use camera::types::{CameraDevice, Lens, StreamRequest};

pub use channel::{ChannelError, MethodCall, MethodChannel};
pub use session::{SessionController, SessionError, SessionEvent, SessionHandle, SessionState};
pub use settings::EffectsConfig;

/// Create the camera backend for this build.
///
/// When `DUMMY_CAMERA=1` is set, a simulated camera is used instead.
pub fn create_backend() -> Arc<dyn CameraBackend> {
    if camera::dummy::DummyBackend::is_enabled() {
        tracing::info!("using simulated camera backend");
        return Arc::new(camera::dummy::DummyBackend::new());
    }
    Arc::new(NullBackend)
}

/// Backend with no cameras, used where no native backend is linked in.
pub struct NullBackend;

impl CameraBackend for NullBackend {
    fn enumerate_devices(&self) -> CameraResult<Vec<CameraDevice>> {
        Ok(vec![])
    }

    fn open(&self, lens: Lens, _request: &StreamRequest) -> CameraResult<Box<dyn CaptureDevice>> {
        Err(CameraError::DeviceNotFound(format!("no {lens:?} camera")))
    }
}
