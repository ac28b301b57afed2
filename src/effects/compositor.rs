use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use crate::effects::effect::{EffectFactory, EffectSpec, FrameEffect};
use crate::effects::error::Result;
use crate::effects::filter::{FilterFactory, FilterSpec, FrameFilter};
use crate::effects::{blend_with_original, FrameContext};
use crate::frame::FrameBuffer;
use crate::tracker::types::LandmarkSet;

/// Which compositor stages a consumer wants applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Stages {
    pub filter: bool,
    pub effect: bool,
}

impl Stages {
    pub const ALL: Stages = Stages {
        filter: true,
        effect: true,
    };
    pub const NONE: Stages = Stages {
        filter: false,
        effect: false,
    };
}

impl Default for Stages {
    fn default() -> Self {
        Self::ALL
    }
}

struct ActiveFilter {
    spec: FilterSpec,
    imp: Box<dyn FrameFilter>,
}

struct ActiveEffect {
    spec: EffectSpec,
    imp: Box<dyn FrameEffect>,
}

/// Applies the active filter, then the active effect, to each frame.
///
/// Each slot sits behind its own lock. `apply` holds the read side for the
/// duration of a stage, so replacing a filter or effect waits for the frame
/// currently inside that stage and the old instance is dropped before the
/// new one becomes visible.
pub struct Compositor {
    filters: FilterFactory,
    effects: EffectFactory,
    filter: RwLock<Option<ActiveFilter>>,
    effect: RwLock<Option<ActiveEffect>>,
    composited: AtomicU64,
    effect_skips: AtomicU64,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor {
    pub fn new() -> Self {
        Self {
            filters: FilterFactory::new(),
            effects: EffectFactory::new(),
            filter: RwLock::new(None),
            effect: RwLock::new(None),
            composited: AtomicU64::new(0),
            effect_skips: AtomicU64::new(0),
        }
    }

    /// Build and install a filter. Creation failures leave the current
    /// filter in place.
    pub fn set_filter(&self, spec: FilterSpec) -> Result<()> {
        let imp = self.filters.create(&spec)?;
        let mut slot = self.filter.write();
        drop(slot.take());
        tracing::debug!(id = %spec.id, kind = ?spec.kind, intensity = spec.intensity, "filter set");
        *slot = Some(ActiveFilter { spec, imp });
        Ok(())
    }

    pub fn clear_filter(&self) -> bool {
        self.filter.write().take().is_some()
    }

    pub fn set_effect(&self, spec: EffectSpec) -> Result<()> {
        let imp = self.effects.create(&spec)?;
        let mut slot = self.effect.write();
        drop(slot.take());
        tracing::debug!(id = %spec.id, kind = ?spec.kind, intensity = spec.intensity, "effect set");
        *slot = Some(ActiveEffect { spec, imp });
        Ok(())
    }

    pub fn clear_effect(&self) -> bool {
        self.effect.write().take().is_some()
    }

    pub fn filter_spec(&self) -> Option<FilterSpec> {
        self.filter.read().as_ref().map(|f| f.spec.clone())
    }

    pub fn composited_frames(&self) -> u64 {
        self.composited.load(Ordering::Relaxed)
    }

    /// Frames where the effect was skipped for lack of landmarks.
    pub fn effect_skips(&self) -> u64 {
        self.effect_skips.load(Ordering::Relaxed)
    }

    /// Run the requested stages over `frame`. `landmarks` must already be
    /// correlated with and scaled to this frame.
    pub fn apply(
        &self,
        mut frame: FrameBuffer,
        stages: Stages,
        landmarks: Option<&LandmarkSet>,
    ) -> FrameBuffer {
        let ctx = FrameContext {
            landmarks,
            time_s: frame.timestamp_us as f32 / 1_000_000.0,
        };

        if stages.filter {
            if let Some(active) = self.filter.read().as_ref() {
                frame = run_stage(frame, active.spec.intensity, |f| active.imp.apply(f, &ctx));
            }
        }

        if stages.effect {
            if let Some(active) = self.effect.read().as_ref() {
                if active.imp.requires_landmarks() && !landmarks.is_some_and(|set| !set.is_empty()) {
                    self.effect_skips.fetch_add(1, Ordering::Relaxed);
                } else {
                    frame =
                        run_stage(frame, active.spec.intensity, |f| active.imp.apply(f, &ctx));
                }
            }
        }

        self.composited.fetch_add(1, Ordering::Relaxed);
        frame
    }
}

fn run_stage(mut frame: FrameBuffer, intensity: f32, stage: impl FnOnce(&mut FrameBuffer)) -> FrameBuffer {
    if intensity <= 0.0 {
        return frame;
    }
    if intensity >= 1.0 {
        stage(&mut frame);
        return frame;
    }
    let original = frame.clone();
    stage(&mut frame);
    blend_with_original(&mut frame, &original, intensity);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::types::Resolution;
    use crate::effects::effect::EffectKind;
    use crate::effects::error::EffectError;
    use crate::effects::filter::{FilterKind, ParamValue};
    use crate::frame::Rgba;
    use crate::tracker::types::{FaceLandmarks, FaceRect};

    fn negative() -> FilterSpec {
        let mut spec = FilterSpec::new("neg", FilterKind::ColorMatrix);
        spec.params
            .insert("preset".into(), ParamValue::Text("negative".into()));
        spec
    }

    fn grey() -> FrameBuffer {
        FrameBuffer::solid(8, 8, Rgba::opaque(40, 40, 40), 7)
    }

    #[test]
    fn passthrough_without_stages() {
        let compositor = Compositor::new();
        let out = compositor.apply(grey(), Stages::ALL, None);
        assert_eq!(out, grey());
        assert_eq!(compositor.composited_frames(), 1);
    }

    #[test]
    fn filter_applies_and_bypasses() {
        let compositor = Compositor::new();
        compositor.set_filter(negative()).unwrap();
        let filtered = compositor.apply(grey(), Stages::ALL, None);
        assert_eq!(filtered.pixel(0, 0), Rgba::opaque(215, 215, 215));
        let raw = compositor.apply(grey(), Stages::NONE, None);
        assert_eq!(raw.pixel(0, 0), Rgba::opaque(40, 40, 40));
        assert_eq!(raw.timestamp_us, 7);
    }

    #[test]
    fn zero_intensity_is_identity() {
        let compositor = Compositor::new();
        let mut spec = negative();
        spec.intensity = 0.0;
        compositor.set_filter(spec).unwrap();
        assert_eq!(compositor.apply(grey(), Stages::ALL, None), grey());
    }

    #[test]
    fn half_intensity_blends() {
        let compositor = Compositor::new();
        let mut spec = negative();
        spec.intensity = 0.5;
        compositor.set_filter(spec).unwrap();
        let out = compositor.apply(grey(), Stages::ALL, None);
        let r = out.pixel(0, 0).r;
        assert!((127..=128).contains(&r), "{r}");
    }

    #[test]
    fn failed_replacement_keeps_previous_filter() {
        let compositor = Compositor::new();
        compositor.set_filter(negative()).unwrap();
        let bad = FilterSpec::new("lut", FilterKind::LookupTable);
        assert!(matches!(
            compositor.set_filter(bad),
            Err(EffectError::InvalidParameter { .. })
        ));
        assert_eq!(compositor.filter_spec().unwrap().id, "neg");
        assert!(compositor.clear_filter());
        assert!(!compositor.clear_filter());
    }

    #[test]
    fn landmark_effects_skip_frames_without_faces() {
        let compositor = Compositor::new();
        compositor
            .set_effect(EffectSpec::new("warp", EffectKind::FaceWarp))
            .unwrap();
        let out = compositor.apply(grey(), Stages::ALL, None);
        assert_eq!(out, grey());
        let empty = LandmarkSet::empty(7, Resolution::new(8, 8));
        compositor.apply(grey(), Stages::ALL, Some(&empty));
        assert_eq!(compositor.effect_skips(), 2);

        let face = LandmarkSet {
            faces: vec![FaceLandmarks {
                bounds: FaceRect {
                    x: 1.0,
                    y: 1.0,
                    width: 6.0,
                    height: 6.0,
                },
                points: Vec::new(),
                confidence: 1.0,
            }],
            timestamp_us: 7,
            frame: Resolution::new(8, 8),
        };
        compositor.apply(grey(), Stages::ALL, Some(&face));
        assert_eq!(compositor.effect_skips(), 2);
    }

    #[test]
    fn filter_runs_before_effect() {
        let compositor = Compositor::new();
        compositor.set_filter(negative()).unwrap();
        let mut mask = EffectSpec::new("mask", EffectKind::OverlayMask);
        mask.track_face = Some(false);
        compositor.set_effect(mask).unwrap();
        // The built-in mask leaves corners transparent, so they show the
        // filtered colour rather than the original.
        let out = compositor.apply(grey(), Stages::ALL, None);
        assert_eq!(out.pixel(0, 0), Rgba::opaque(215, 215, 215));
    }

    #[test]
    fn compositor_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Compositor>();
    }
}
