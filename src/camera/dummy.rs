use std::f32::consts::TAU;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::camera::backend::{AudioCapture, CameraBackend, CaptureDevice, RawFrame};
use crate::camera::convert::rgb_to_nv12;
use crate::camera::error::{CameraError, Result};
use crate::camera::types::{
    CameraDevice, DeviceId, FlashMode, FormatDescriptor, Lens, PixelFormat, StreamRequest,
};

const FRONT_DEVICE_ID: &str = "dummy:front";
const BACK_DEVICE_ID: &str = "dummy:back";

/// Sizes every simulated camera advertises.
const DUMMY_SIZES: &[(u32, u32)] = &[
    (320, 240),
    (640, 480),
    (1280, 720),
    (1920, 1080),
    (3840, 2160),
];

const AUDIO_SAMPLE_RATE: u32 = 44_100;
const AUDIO_TONE_HZ: f64 = 440.0;

/// Knobs for the simulated cameras, mostly for fault injection in tests.
#[derive(Debug, Clone)]
pub struct DummyOptions {
    pub pixel_format: PixelFormat,
    /// Fixed frame pacing; `None` paces at the requested fps.
    pub frame_interval: Option<Duration>,
    /// Draw the synthetic face into the test pattern.
    pub face: bool,
    pub fail_open: Option<Lens>,
    /// Every n-th frame arrives truncated.
    pub corrupt_every: Option<u64>,
    /// After n frames the device stops delivering.
    pub stall_after: Option<u64>,
    /// After n frames the device reports a disconnect.
    pub disconnect_after: Option<u64>,
    pub audio: bool,
}

impl Default for DummyOptions {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Nv12,
            frame_interval: None,
            face: true,
            fail_open: None,
            corrupt_every: None,
            stall_after: None,
            disconnect_after: None,
            audio: true,
        }
    }
}

/// A fake camera backend for running without real hardware.
///
/// Exposes a front camera and a back camera (with flash). Frames are a
/// moving gradient with a skin-toned face drawn in, so face tracking and
/// face-bound effects have something to work on.
///
/// Enable via `DUMMY_CAMERA=1` environment variable.
pub struct DummyBackend {
    options: DummyOptions,
    live: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl DummyBackend {
    pub fn new() -> Self {
        Self::with_options(DummyOptions::default())
    }

    pub fn with_options(options: DummyOptions) -> Self {
        Self {
            options,
            live: Arc::new(AtomicUsize::new(0)),
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Whether the dummy camera is enabled via environment variable.
    pub fn is_enabled() -> bool {
        std::env::var("DUMMY_CAMERA").is_ok_and(|v| v == "1" || v == "true")
    }

    /// The stable device ID for the dummy camera facing `lens`.
    pub fn device_id(lens: Lens) -> DeviceId {
        match lens {
            Lens::Front => DeviceId::new(FRONT_DEVICE_ID),
            Lens::Back => DeviceId::new(BACK_DEVICE_ID),
        }
    }

    /// Devices currently open and not yet closed.
    pub fn live_devices(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Total successful `open` calls.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::Acquire)
    }

    fn describe(&self, lens: Lens) -> CameraDevice {
        let formats = DUMMY_SIZES
            .iter()
            .map(|&(width, height)| FormatDescriptor {
                width,
                height,
                fps: 30.0,
                pixel_format: self.options.pixel_format,
            })
            .collect();
        match lens {
            Lens::Front => CameraDevice {
                id: Self::device_id(lens),
                name: "Dummy Front Camera".to_string(),
                lens,
                has_flash: false,
                max_zoom: 4.0,
                formats,
            },
            Lens::Back => CameraDevice {
                id: Self::device_id(lens),
                name: "Dummy Back Camera".to_string(),
                lens,
                has_flash: true,
                max_zoom: 8.0,
                formats,
            },
        }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for DummyBackend {
    fn enumerate_devices(&self) -> Result<Vec<CameraDevice>> {
        Ok(vec![self.describe(Lens::Front), self.describe(Lens::Back)])
    }

    fn open(&self, lens: Lens, request: &StreamRequest) -> Result<Box<dyn CaptureDevice>> {
        if self.options.fail_open == Some(lens) {
            return Err(CameraError::Busy(Self::device_id(lens).to_string()));
        }

        let device = self.describe(lens);
        let format = FormatDescriptor::best_match(&device.formats, request)
            .cloned()
            .ok_or_else(|| CameraError::Unsupported(format!("no format for {lens:?}")))?;
        let interval = self.options.frame_interval.unwrap_or_else(|| {
            Duration::from_secs_f64(1.0 / f64::from(request.fps.clamp(1, 1000)))
        });

        self.live.fetch_add(1, Ordering::AcqRel);
        self.opened.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(
            device = %device.id,
            width = format.width,
            height = format.height,
            "dummy camera opened"
        );

        let now = Instant::now();
        Ok(Box::new(DummyDevice {
            device,
            format,
            options: self.options.clone(),
            interval,
            frame_index: 0,
            started: now,
            next_due: now,
            flash: FlashMode::Off,
            closed: false,
            live: Arc::clone(&self.live),
        }))
    }

    fn open_audio(&self) -> Result<Option<Box<dyn AudioCapture>>> {
        if !self.options.audio {
            return Ok(None);
        }
        Ok(Some(Box::new(DummyAudio { phase: 0.0 })))
    }
}

struct DummyDevice {
    device: CameraDevice,
    format: FormatDescriptor,
    options: DummyOptions,
    interval: Duration,
    frame_index: u64,
    started: Instant,
    next_due: Instant,
    flash: FlashMode,
    closed: bool,
    live: Arc<AtomicUsize>,
}

impl DummyDevice {
    fn wait_for_slot(&mut self, timeout: Duration) -> Result<()> {
        let now = Instant::now();
        if self.next_due > now {
            let wait = self.next_due - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Err(CameraError::Timeout(timeout));
            }
            std::thread::sleep(wait);
            self.next_due += self.interval;
        } else {
            self.next_due = now + self.interval;
        }
        Ok(())
    }
}

impl CaptureDevice for DummyDevice {
    fn device(&self) -> &CameraDevice {
        &self.device
    }

    fn format(&self) -> FormatDescriptor {
        self.format.clone()
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<RawFrame> {
        if self.closed {
            return Err(CameraError::Disconnected(self.device.id.to_string()));
        }

        let index = self.frame_index;
        if self.options.disconnect_after.is_some_and(|n| index >= n) {
            return Err(CameraError::Disconnected(self.device.id.to_string()));
        }
        if self.options.stall_after.is_some_and(|n| index >= n) {
            std::thread::sleep(timeout);
            return Err(CameraError::Timeout(timeout));
        }

        self.wait_for_slot(timeout)?;
        self.frame_index += 1;

        let (width, height) = (self.format.width, self.format.height);
        let mut rgb = render_test_pattern(width, height, index, self.options.face);
        if self.flash == FlashMode::Torch {
            for v in &mut rgb {
                *v = v.saturating_add(50);
            }
        }

        let mut data = encode(&rgb, width, height, self.format.pixel_format);
        if self
            .options
            .corrupt_every
            .is_some_and(|n| n > 0 && (index + 1) % n == 0)
        {
            data.truncate(data.len() / 2);
        }

        Ok(RawFrame {
            data,
            width,
            height,
            format: self.format.pixel_format,
            device_timestamp_us: self.started.elapsed().as_micros() as u64,
        })
    }

    fn set_flash(&mut self, mode: FlashMode) -> Result<()> {
        if !self.device.has_flash && mode != FlashMode::Off {
            return Err(CameraError::Unsupported(format!(
                "{} has no flash",
                self.device.name
            )));
        }
        self.flash = mode;
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.live.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!(device = %self.device.id, "dummy camera closed");
        }
    }
}

impl Drop for DummyDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// Where the synthetic face sits in frame `index`: centre and radii in pixels.
pub(crate) fn face_geometry(width: u32, height: u32, index: u64) -> (f32, f32, f32, f32) {
    let (w, h) = (width as f32, height as f32);
    let t = index as f32 * 0.05;
    let cx = w * (0.5 + 0.08 * (t * TAU / 8.0).sin());
    let cy = h * 0.5;
    let rx = w.min(h) * 0.18;
    let ry = rx * 1.3;
    (cx, cy, rx, ry)
}

fn inside_ellipse(x: f32, y: f32, cx: f32, cy: f32, rx: f32, ry: f32) -> bool {
    let dx = (x - cx) / rx;
    let dy = (y - cy) / ry;
    dx * dx + dy * dy <= 1.0
}

/// Render one RGB24 frame of the moving test pattern.
fn render_test_pattern(width: u32, height: u32, index: u64, face: bool) -> Vec<u8> {
    let (cx, cy, rx, ry) = face_geometry(width, height, index);
    let eye_r = rx * 0.14;
    let eyes = [(cx - rx * 0.4, cy - ry * 0.22), (cx + rx * 0.4, cy - ry * 0.22)];
    let mouth = (cx, cy + ry * 0.45, rx * 0.35, ry * 0.08);
    let shift = (index * 4) as u32;

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        for x in 0..width {
            let (fx, fy) = (x as f32 + 0.5, y as f32 + 0.5);
            let mut px = [
                30 + (x * 40 / width.max(1)) as u8,
                60 + (y * 60 / height.max(1)) as u8,
                150 + ((x + shift) % 64) as u8,
            ];
            if face && inside_ellipse(fx, fy, cx, cy, rx, ry) {
                px = [224, 172, 140];
                if eyes
                    .iter()
                    .any(|&(ex, ey)| inside_ellipse(fx, fy, ex, ey, eye_r, eye_r))
                {
                    px = [35, 25, 30];
                } else if inside_ellipse(fx, fy, mouth.0, mouth.1, mouth.2, mouth.3) {
                    px = [140, 50, 60];
                }
            }
            rgb.extend_from_slice(&px);
        }
    }
    rgb
}

fn encode(rgb: &[u8], width: u32, height: u32, format: PixelFormat) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    match format {
        PixelFormat::Rgb24 => rgb.to_vec(),
        PixelFormat::Rgba8 => {
            let mut out = Vec::with_capacity(w * h * 4);
            for px in rgb.chunks_exact(3) {
                out.extend_from_slice(&[px[0], px[1], px[2], 255]);
            }
            out
        }
        PixelFormat::Bgr24BottomUp => {
            let mut out = Vec::with_capacity(rgb.len());
            for row in rgb.chunks_exact(w * 3).rev() {
                for px in row.chunks_exact(3) {
                    out.extend_from_slice(&[px[2], px[1], px[0]]);
                }
            }
            out
        }
        PixelFormat::Yuy2 => rgb_to_yuy2(rgb),
        PixelFormat::Nv12 => rgb_to_nv12(rgb, w, h),
    }
}

fn rgb_to_yuy2(rgb: &[u8]) -> Vec<u8> {
    let luma = |p: &[u8]| {
        ((77 * i32::from(p[0]) + 150 * i32::from(p[1]) + 29 * i32::from(p[2])) >> 8) as u8
    };
    let mut out = Vec::with_capacity(rgb.len() / 3 * 2);
    for pair in rgb.chunks_exact(6) {
        let (p0, p1) = (&pair[..3], &pair[3..]);
        let r = (i32::from(p0[0]) + i32::from(p1[0])) / 2;
        let g = (i32::from(p0[1]) + i32::from(p1[1])) / 2;
        let b = (i32::from(p0[2]) + i32::from(p1[2])) / 2;
        let u = (((-43 * r - 85 * g + 128 * b) >> 8) + 128).clamp(0, 255) as u8;
        let v = (((128 * r - 107 * g - 21 * b) >> 8) + 128).clamp(0, 255) as u8;
        out.extend_from_slice(&[luma(p0), u, luma(p1), v]);
    }
    out
}

/// A 440 Hz sine tone at 44.1 kHz mono.
struct DummyAudio {
    phase: f64,
}

impl AudioCapture for DummyAudio {
    fn sample_rate(&self) -> u32 {
        AUDIO_SAMPLE_RATE
    }

    fn channels(&self) -> u16 {
        1
    }

    fn read_samples(&mut self, frames: usize) -> Result<Vec<i16>> {
        let step = AUDIO_TONE_HZ / f64::from(AUDIO_SAMPLE_RATE);
        let samples = (0..frames)
            .map(|_| {
                let s = (self.phase * std::f64::consts::TAU).sin() * 8000.0;
                self.phase = (self.phase + step).fract();
                s as i16
            })
            .collect();
        Ok(samples)
    }
}
