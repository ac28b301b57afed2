use std::time::Duration;

use crate::camera::error::Result;
use crate::camera::types::{
    CameraDevice, FlashMode, FormatDescriptor, Lens, PixelFormat, StreamRequest,
};

/// Frame as delivered by a capture device, before conversion to RGBA.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Device clock in microseconds; only used for diagnostics.
    pub device_timestamp_us: u64,
}

/// Platform-agnostic camera backend trait.
///
/// Implemented per-platform (Camera2 on Android, AVFoundation on iOS) and
/// by the simulated [`DummyBackend`](crate::camera::dummy::DummyBackend).
pub trait CameraBackend: Send + Sync {
    /// Enumerate all cameras the session may open.
    fn enumerate_devices(&self) -> Result<Vec<CameraDevice>>;

    /// Open the camera facing `lens`, negotiating the closest format to
    /// `request`.
    fn open(&self, lens: Lens, request: &StreamRequest) -> Result<Box<dyn CaptureDevice>>;

    /// Open the microphone. `Ok(None)` means the backend has no audio input.
    fn open_audio(&self) -> Result<Option<Box<dyn AudioCapture>>> {
        Ok(None)
    }
}

/// An opened camera streaming frames.
pub trait CaptureDevice: Send {
    fn device(&self) -> &CameraDevice;

    /// The negotiated stream format.
    fn format(&self) -> FormatDescriptor;

    /// Block until the next frame arrives or `timeout` elapses.
    fn read_frame(&mut self, timeout: Duration) -> Result<RawFrame>;

    fn set_flash(&mut self, mode: FlashMode) -> Result<()>;

    /// Release the device. Idempotent.
    fn close(&mut self);
}

/// An opened microphone delivering interleaved signed 16-bit PCM.
pub trait AudioCapture: Send {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Read `frames` sample frames (each `channels` samples wide).
    fn read_samples(&mut self, frames: usize) -> Result<Vec<i16>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::error::CameraError;
    use crate::camera::types::{DeviceId, Resolution};
    use std::sync::Arc;

    /// A back camera that always returns the same grey RGB24 frame.
    struct StillBackend;

    struct StillDevice {
        info: CameraDevice,
        open: bool,
    }

    fn back_camera() -> CameraDevice {
        CameraDevice {
            id: DeviceId::new("still:back"),
            name: "Still".to_string(),
            lens: Lens::Back,
            has_flash: false,
            max_zoom: 1.0,
            formats: vec![FormatDescriptor {
                width: 4,
                height: 2,
                fps: 30.0,
                pixel_format: PixelFormat::Rgb24,
            }],
        }
    }

    impl CameraBackend for StillBackend {
        fn enumerate_devices(&self) -> Result<Vec<CameraDevice>> {
            Ok(vec![back_camera()])
        }

        fn open(&self, lens: Lens, _request: &StreamRequest) -> Result<Box<dyn CaptureDevice>> {
            match lens {
                Lens::Back => Ok(Box::new(StillDevice {
                    info: back_camera(),
                    open: true,
                })),
                Lens::Front => Err(CameraError::DeviceNotFound("front".into())),
            }
        }
    }

    impl CaptureDevice for StillDevice {
        fn device(&self) -> &CameraDevice {
            &self.info
        }

        fn format(&self) -> FormatDescriptor {
            self.info.formats[0].clone()
        }

        fn read_frame(&mut self, timeout: Duration) -> Result<RawFrame> {
            if !self.open {
                return Err(CameraError::Timeout(timeout));
            }
            Ok(RawFrame {
                data: vec![128; 4 * 2 * 3],
                width: 4,
                height: 2,
                format: PixelFormat::Rgb24,
                device_timestamp_us: 0,
            })
        }

        fn set_flash(&mut self, mode: FlashMode) -> Result<()> {
            Err(CameraError::Unsupported(format!("{mode:?} without a flash unit")))
        }

        fn close(&mut self) {
            self.open = false;
        }
    }

    fn request() -> StreamRequest {
        StreamRequest {
            resolution: Resolution::new(4, 2),
            fps: 30,
        }
    }

    #[test]
    fn opened_device_streams_until_closed() {
        let backend: Arc<dyn CameraBackend> = Arc::new(StillBackend);
        let mut device = backend.open(Lens::Back, &request()).unwrap();
        assert_eq!(device.device().lens, Lens::Back);
        let frame = device.read_frame(Duration::from_millis(10)).unwrap();
        assert_eq!(frame.data.len(), 24);

        device.close();
        device.close();
        let err = device.read_frame(Duration::from_millis(10)).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn missing_lens_is_device_not_found() {
        let result = StillBackend.open(Lens::Front, &request());
        assert!(matches!(result, Err(CameraError::DeviceNotFound(_))));
    }

    #[test]
    fn default_open_audio_reports_no_microphone() {
        assert!(StillBackend.open_audio().unwrap().is_none());
    }
}
