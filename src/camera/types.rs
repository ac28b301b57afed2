use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable camera identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new `DeviceId` from a raw string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which physical camera a session captures from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lens {
    Front,
    Back,
}

impl Lens {
    /// Integer encoding used on the method channel (0 = front, 1 = back).
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Self::Front),
            1 => Some(Self::Back),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "front" => Some(Self::Front),
            "back" | "rear" => Some(Self::Back),
            _ => None,
        }
    }

    pub fn as_index(self) -> i64 {
        match self {
            Self::Front => 0,
            Self::Back => 1,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Front => Self::Back,
            Self::Back => Self::Front,
        }
    }
}

/// Flash behaviour for photo capture and torch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashMode {
    #[default]
    Off,
    Auto,
    On,
    Torch,
}

impl FlashMode {
    /// Integer encoding used on the method channel.
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Self::Off),
            1 => Some(Self::Auto),
            2 => Some(Self::On),
            3 => Some(Self::Torch),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "auto" => Some(Self::Auto),
            "on" | "always" => Some(Self::On),
            "torch" => Some(Self::Torch),
            _ => None,
        }
    }
}

/// Named capture resolution tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionPreset {
    Low,
    Medium,
    #[default]
    High,
    VeryHigh,
    UltraHigh,
    Max,
}

impl ResolutionPreset {
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Self::Low),
            1 => Some(Self::Medium),
            2 => Some(Self::High),
            3 => Some(Self::VeryHigh),
            4 => Some(Self::UltraHigh),
            5 => Some(Self::Max),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "veryhigh" => Some(Self::VeryHigh),
            "ultrahigh" => Some(Self::UltraHigh),
            "max" => Some(Self::Max),
            _ => None,
        }
    }

    pub fn resolution(self) -> Resolution {
        match self {
            Self::Low => Resolution::new(320, 240),
            Self::Medium => Resolution::new(640, 480),
            Self::High => Resolution::new(1280, 720),
            Self::VeryHigh => Resolution::new(1920, 1080),
            Self::UltraHigh | Self::Max => Resolution::new(3840, 2160),
        }
    }
}

/// Output dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel layouts a capture device may deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Packed 8-bit RGBA; the only layout the compositor accepts.
    Rgba8,
    Rgb24,
    /// BGR with rows stored bottom-to-top.
    Bgr24BottomUp,
    Yuy2,
    Nv12,
}

impl PixelFormat {
    /// Expected byte length of a frame with this layout.
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Rgba8 => pixels * 4,
            Self::Rgb24 | Self::Bgr24BottomUp => pixels * 3,
            Self::Yuy2 => pixels * 2,
            Self::Nv12 => pixels * 3 / 2,
        }
    }
}

/// Camera video format descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDescriptor {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    pub pixel_format: PixelFormat,
}

impl FormatDescriptor {
    /// Pick the format closest to the requested size, preferring formats
    /// that can reach the requested frame rate.
    pub fn best_match<'a>(
        formats: &'a [FormatDescriptor],
        request: &StreamRequest,
    ) -> Option<&'a FormatDescriptor> {
        formats.iter().min_by_key(|f| {
            let dw = (i64::from(f.width) - i64::from(request.resolution.width)).abs();
            let dh = (i64::from(f.height) - i64::from(request.resolution.height)).abs();
            let too_slow = f.fps + 0.5 < request.fps as f32;
            (too_slow, dw + dh)
        })
    }
}

/// Discovered camera device.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDevice {
    pub id: DeviceId,
    pub name: String,
    pub lens: Lens,
    pub has_flash: bool,
    pub max_zoom: f32,
    pub formats: Vec<FormatDescriptor>,
}

/// What the frame source asks a device for when opening it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamRequest {
    pub resolution: Resolution,
    pub fps: u32,
}

/// Immutable capture settings applied at initialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    pub preset: ResolutionPreset,
    /// Explicit size overriding the preset.
    pub custom_resolution: Option<Resolution>,
    pub lens: Lens,
    pub fps: u32,
    pub flash_mode: FlashMode,
    pub zoom: f32,
    pub face_detection: bool,
    pub audio: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            preset: ResolutionPreset::High,
            custom_resolution: None,
            lens: Lens::Back,
            fps: 30,
            flash_mode: FlashMode::Off,
            zoom: 1.0,
            face_detection: false,
            audio: true,
        }
    }
}

pub const MAX_FPS: u32 = 120;
pub const MAX_DIMENSION: u32 = 7680;

impl CaptureConfig {
    /// Effective output resolution.
    pub fn resolution(&self) -> Resolution {
        self.custom_resolution
            .unwrap_or_else(|| self.preset.resolution())
    }

    pub fn stream_request(&self) -> StreamRequest {
        StreamRequest {
            resolution: self.resolution(),
            fps: self.fps,
        }
    }

    /// Reject settings no capture device could honour.
    pub fn validate(&self) -> Result<(), String> {
        let res = self.resolution();
        if res.width == 0 || res.height == 0 {
            return Err(format!("resolution {res} must be non-zero"));
        }
        if res.width > MAX_DIMENSION || res.height > MAX_DIMENSION {
            return Err(format!("resolution {res} exceeds {MAX_DIMENSION} pixels"));
        }
        if res.width % 2 != 0 || res.height % 2 != 0 {
            return Err(format!("resolution {res} must have even dimensions"));
        }
        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(format!("fps {} outside 1..={MAX_FPS}", self.fps));
        }
        if !self.zoom.is_finite() || self.zoom < 1.0 {
            return Err(format!("zoom {} must be at least 1.0", self.zoom));
        }
        Ok(())
    }
}
