use std::path::PathBuf;

use crate::effects::beautify::BeautifyEffect;
use crate::effects::error::{EffectError, Result};
use crate::effects::filter::unit_param;
use crate::effects::overlay::OverlayMaskEffect;
use crate::effects::warp::FaceWarpEffect;
use crate::effects::FrameContext;
use crate::frame::FrameBuffer;

/// Face-aware effect families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    OverlayMask,
    Beautify,
    FaceWarp,
}

impl EffectKind {
    /// Channel encoding: 0 overlay mask, 1 beautify, 2 face warp.
    pub fn from_index(index: i64) -> Result<Self> {
        match index {
            0 => Ok(Self::OverlayMask),
            1 => Ok(Self::Beautify),
            2 => Ok(Self::FaceWarp),
            _ => Err(EffectError::UnsupportedKind {
                category: "effect",
                kind: index.to_string(),
            }),
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "overlaymask" | "overlay" | "mask" => Ok(Self::OverlayMask),
            "beautify" | "beauty" => Ok(Self::Beautify),
            "facewarp" | "warp" => Ok(Self::FaceWarp),
            _ => Err(EffectError::UnsupportedKind {
                category: "effect",
                kind: name.to_string(),
            }),
        }
    }
}

pub const DEFAULT_SMOOTHING: f32 = 0.5;
pub const DEFAULT_WHITENING: f32 = 0.3;
pub const DEFAULT_EYE_ENLARGE: f32 = 0.2;
pub const DEFAULT_FACE_SLIM: f32 = 0.1;

/// Declarative description of the AR effect to apply.
///
/// Unset magnitudes fall back to the `DEFAULT_*` constants.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectSpec {
    pub id: String,
    pub kind: EffectKind,
    pub intensity: f32,
    pub requires_face_detection: bool,
    pub mask_path: Option<PathBuf>,
    pub track_face: Option<bool>,
    pub smoothing: Option<f32>,
    pub whitening: Option<f32>,
    pub eye_enlarge: Option<f32>,
    pub face_slim: Option<f32>,
}

impl EffectSpec {
    pub fn new(id: impl Into<String>, kind: EffectKind) -> Self {
        Self {
            id: id.into(),
            kind,
            intensity: 1.0,
            requires_face_detection: false,
            mask_path: None,
            track_face: None,
            smoothing: None,
            whitening: None,
            eye_enlarge: None,
            face_slim: None,
        }
    }

    /// Whether the effect cannot run without face landmarks. Warps always
    /// do; other kinds only when the caller asked for tracking.
    pub fn needs_landmarks(&self) -> bool {
        self.kind == EffectKind::FaceWarp || self.requires_face_detection
    }
}

/// A ready-to-run AR effect.
pub trait FrameEffect: Send + Sync {
    fn kind(&self) -> EffectKind;

    /// Frames without correlated landmarks skip the effect entirely.
    fn requires_landmarks(&self) -> bool;

    fn apply(&self, frame: &mut FrameBuffer, ctx: &FrameContext<'_>);
}

#[derive(Debug, Default, Clone)]
pub struct EffectFactory;

impl EffectFactory {
    pub fn new() -> Self {
        Self
    }

    pub fn create(&self, spec: &EffectSpec) -> Result<Box<dyn FrameEffect>> {
        unit_param("intensity", spec.intensity)?;
        let requires = spec.needs_landmarks();
        match spec.kind {
            EffectKind::OverlayMask => {
                let effect = match spec.mask_path.as_deref() {
                    Some(path) => OverlayMaskEffect::load(path)?,
                    None => OverlayMaskEffect::builtin(),
                };
                Ok(Box::new(
                    effect
                        .track_face(spec.track_face.unwrap_or(true))
                        .requiring_landmarks(requires),
                ))
            }
            EffectKind::Beautify => Ok(Box::new(BeautifyEffect::new(
                unit_param("smoothing", spec.smoothing.unwrap_or(DEFAULT_SMOOTHING))?,
                unit_param("whitening", spec.whitening.unwrap_or(DEFAULT_WHITENING))?,
                requires,
            ))),
            EffectKind::FaceWarp => Ok(Box::new(FaceWarpEffect::new(
                unit_param("eyeEnlarge", spec.eye_enlarge.unwrap_or(DEFAULT_EYE_ENLARGE))?,
                unit_param("faceSlim", spec.face_slim.unwrap_or(DEFAULT_FACE_SLIM))?,
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_accepts_index_and_name() {
        assert_eq!(EffectKind::from_index(2).unwrap(), EffectKind::FaceWarp);
        assert_eq!(EffectKind::from_name("overlay_mask").unwrap(), EffectKind::OverlayMask);
        assert!(matches!(
            EffectKind::from_name("sparkles"),
            Err(EffectError::UnsupportedKind { category: "effect", .. })
        ));
    }

    #[test]
    fn warp_always_needs_landmarks() {
        let warp = EffectSpec::new("w", EffectKind::FaceWarp);
        assert!(warp.needs_landmarks());
        let mut beauty = EffectSpec::new("b", EffectKind::Beautify);
        assert!(!beauty.needs_landmarks());
        beauty.requires_face_detection = true;
        assert!(beauty.needs_landmarks());
    }

    #[test]
    fn factory_applies_landmark_requirement() {
        let factory = EffectFactory::new();
        let warp = factory.create(&EffectSpec::new("w", EffectKind::FaceWarp)).unwrap();
        assert!(warp.requires_landmarks());
        let mask = factory.create(&EffectSpec::new("m", EffectKind::OverlayMask)).unwrap();
        assert!(!mask.requires_landmarks());
        assert_eq!(mask.kind(), EffectKind::OverlayMask);
    }

    #[test]
    fn factory_rejects_out_of_range_magnitudes() {
        let mut spec = EffectSpec::new("b", EffectKind::Beautify);
        spec.smoothing = Some(1.5);
        assert!(matches!(
            EffectFactory::new().create(&spec),
            Err(EffectError::InvalidParameter { .. })
        ));
        spec.smoothing = None;
        spec.intensity = -0.1;
        assert!(EffectFactory::new().create(&spec).is_err());
    }

    #[test]
    fn missing_mask_file_is_an_asset_error() {
        let mut spec = EffectSpec::new("m", EffectKind::OverlayMask);
        spec.mask_path = Some(PathBuf::from("/definitely/not/here.png"));
        assert!(matches!(
            EffectFactory::new().create(&spec),
            Err(EffectError::Asset { .. })
        ));
    }
}
