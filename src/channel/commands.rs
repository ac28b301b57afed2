use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::camera::types::{CaptureConfig, FlashMode, Lens, Resolution, ResolutionPreset};
use crate::channel::args::{Args, Selector};
use crate::effects::compositor::Stages;
use crate::effects::effect::{EffectKind, EffectSpec};
use crate::effects::filter::{FilterKind, FilterSpec};
use crate::output::photo::PhotoOptions;
use crate::output::recorder::RecordingOptions;
use crate::session::{SessionError, SessionHandle};

type Outcome = Result<Value, SessionError>;

fn payload<T: Serialize>(value: T) -> Outcome {
    serde_json::to_value(value).map_err(|e| SessionError::Io(format!("encoding reply: {e}")))
}

fn done(result: Result<(), SessionError>) -> Outcome {
    result.map(|()| Value::Null)
}

/// Every method name the channel answers.
pub const METHODS: [&str; 16] = [
    "initialize",
    "startPreview",
    "stopPreview",
    "switchCamera",
    "setFilter",
    "setAREffect",
    "clearAREffect",
    "setZoom",
    "setFlashMode",
    "setFaceDetectionEnabled",
    "setFaceDetection",
    "takePhoto",
    "startRecording",
    "stopRecording",
    "getDiagnostics",
    "dispose",
];

/// Route one method call to the session. Arguments are fully parsed
/// before the session is touched.
pub async fn dispatch(session: &SessionHandle, method: &str, arguments: &Value) -> Outcome {
    if !METHODS.contains(&method) {
        return Err(SessionError::NotImplemented(method.to_string()));
    }
    let args = Args::new(method, arguments)?;
    debug!(method, "method call");
    match method {
        "initialize" => payload(session.initialize(capture_config(&args)?).await?),
        "startPreview" => done(session.start_preview().await),
        "stopPreview" => done(session.stop_preview().await),
        "switchCamera" => {
            let lens = args.enumerated("lens", Lens::from_index, Lens::from_name)?;
            done(session.switch_camera(lens).await)
        }
        "setFilter" => done(session.set_filter(filter_spec(&args)?).await),
        "setAREffect" => done(session.set_ar_effect(effect_spec(&args)?).await),
        "clearAREffect" => done(session.clear_ar_effect().await),
        "setZoom" => {
            let zoom = args.f64("zoom")? as f32;
            done(session.set_zoom(zoom).await)
        }
        "setFlashMode" => {
            let mode = args.enumerated("mode", FlashMode::from_index, FlashMode::from_name)?;
            done(session.set_flash_mode(mode).await)
        }
        "setFaceDetectionEnabled" | "setFaceDetection" => {
            let enabled = args.bool("enabled")?;
            done(session.set_face_detection(enabled).await)
        }
        "takePhoto" => {
            let options = PhotoOptions {
                stages: stages(&args)?,
                save_to_gallery: args.opt_bool("saveToGallery")?.unwrap_or(false),
                path: args.opt_str("path")?.map(PathBuf::from),
            };
            payload(session.take_photo(options).await?)
        }
        "startRecording" => {
            let max_duration = match args.opt_f64("maxDuration")? {
                Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
                Some(secs) => {
                    return Err(SessionError::invalid(format!(
                        "startRecording: maxDuration must be a positive number of seconds, got {secs}"
                    )))
                }
                None => None,
            };
            let options = RecordingOptions {
                stages: stages(&args)?,
                max_duration,
                path: args.opt_str("path")?.map(PathBuf::from),
            };
            done(session.start_recording(options).await)
        }
        "stopRecording" => {
            let save = args.opt_bool("saveToGallery")?.unwrap_or(false);
            payload(session.stop_recording(save).await?)
        }
        "getDiagnostics" => payload(session.diagnostics().await?),
        "dispose" => done(session.dispose().await),
        other => Err(SessionError::NotImplemented(other.to_string())),
    }
}

fn stages(args: &Args<'_>) -> Result<Stages, SessionError> {
    Ok(Stages {
        filter: args.opt_bool("applyFilter")?.unwrap_or(true),
        effect: args.opt_bool("applyAREffect")?.unwrap_or(true),
    })
}

fn capture_config(args: &Args<'_>) -> Result<CaptureConfig, SessionError> {
    let defaults = CaptureConfig::default();
    let custom_resolution = match (args.opt_u32("customWidth")?, args.opt_u32("customHeight")?) {
        (Some(width), Some(height)) => Some(Resolution::new(width, height)),
        (None, None) => None,
        _ => {
            warn!("initialize: customWidth and customHeight must be given together, using preset");
            None
        }
    };
    Ok(CaptureConfig {
        preset: args
            .opt_enum("resolution", ResolutionPreset::from_index, ResolutionPreset::from_name)?
            .unwrap_or(defaults.preset),
        custom_resolution,
        lens: args
            .opt_enum("lens", Lens::from_index, Lens::from_name)?
            .unwrap_or(defaults.lens),
        fps: args.opt_u32("fps")?.unwrap_or(defaults.fps),
        flash_mode: args
            .opt_enum("flashMode", FlashMode::from_index, FlashMode::from_name)?
            .unwrap_or(defaults.flash_mode),
        zoom: args.opt_f64("zoom")?.map_or(defaults.zoom, |z| z as f32),
        face_detection: args
            .opt_bool("enableFaceDetection")?
            .unwrap_or(defaults.face_detection),
        audio: args.opt_bool("enableAudio")?.unwrap_or(defaults.audio),
    })
}

fn filter_spec(args: &Args<'_>) -> Result<FilterSpec, SessionError> {
    let id = args.str("filterId")?;
    let kind = match args.selector("filterType")? {
        Selector::Index(i) => FilterKind::from_index(i)?,
        Selector::Name(name) => FilterKind::from_name(name)?,
    };
    let mut spec = FilterSpec::new(id, kind);
    spec.intensity = args.unit("intensity")?;
    spec.params = args.params("params")?;
    spec.lut_path = args.opt_str("lutPath")?.map(PathBuf::from);
    spec.shader_code = args.opt_str("shaderCode")?.map(str::to_owned);
    Ok(spec)
}

fn effect_spec(args: &Args<'_>) -> Result<EffectSpec, SessionError> {
    let id = args.str("effectId")?;
    let kind = match args.selector("effectType")? {
        Selector::Index(i) => EffectKind::from_index(i)?,
        Selector::Name(name) => EffectKind::from_name(name)?,
    };
    let mut spec = EffectSpec::new(id, kind);
    spec.intensity = args.unit("intensity")?;
    spec.requires_face_detection = args.bool("requiresFaceDetection")?;
    spec.mask_path = args.opt_str("maskPath")?.map(PathBuf::from);
    spec.track_face = args.opt_bool("trackFace")?;
    spec.smoothing = args.opt_unit("smoothing")?;
    spec.whitening = args.opt_unit("whitening")?;
    spec.eye_enlarge = args.opt_unit("eyeEnlarge")?;
    spec.face_slim = args.opt_unit("faceSlim")?;
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse<T>(value: Value, f: impl FnOnce(&Args<'_>) -> Result<T, SessionError>) -> Result<T, SessionError> {
        let args = Args::new("test", &value)?;
        f(&args)
    }

    #[test]
    fn initialize_defaults_follow_plugin() {
        let config = parse(json!({}), capture_config).unwrap();
        assert_eq!(config, CaptureConfig::default());
    }

    #[test]
    fn initialize_reads_codes_and_custom_size() {
        let config = parse(
            json!({ "resolution": 1, "lens": 0, "flashMode": 3, "fps": 60, "customWidth": 800, "customHeight": 600 }),
            capture_config,
        )
        .unwrap();
        assert_eq!(config.preset, ResolutionPreset::Medium);
        assert_eq!(config.lens, Lens::Front);
        assert_eq!(config.flash_mode, FlashMode::Torch);
        assert_eq!(config.resolution(), Resolution::new(800, 600));
    }

    #[test]
    fn half_a_custom_size_is_ignored() {
        let config = parse(json!({ "customWidth": 800 }), capture_config).unwrap();
        assert_eq!(config.custom_resolution, None);
    }

    #[test]
    fn filter_spec_requires_id_type_and_intensity() {
        let err = parse(json!({ "filterType": 0, "intensity": 1.0 }), filter_spec).unwrap_err();
        assert_eq!(err.code(), "invalid-arguments");
        let err = parse(json!({ "filterId": "f", "intensity": 1.0 }), filter_spec).unwrap_err();
        assert_eq!(err.code(), "invalid-arguments");
        let err = parse(json!({ "filterId": "f", "filterType": 1 }), filter_spec).unwrap_err();
        assert_eq!(err.code(), "invalid-arguments");
    }

    #[test]
    fn unknown_filter_type_is_unsupported_kind() {
        let err = parse(
            json!({ "filterId": "f", "filterType": 9, "intensity": 1.0 }),
            filter_spec,
        )
        .unwrap_err();
        assert_eq!(err.code(), "unsupported-kind");
    }

    #[test]
    fn lut_filter_spec() {
        let spec = parse(
            json!({ "filterId": "f1", "filterType": 1, "intensity": 0.8, "lutPath": "/luts/warm.cube" }),
            filter_spec,
        )
        .unwrap();
        assert_eq!(spec.kind, FilterKind::LookupTable);
        assert_eq!(spec.intensity, 0.8);
        assert_eq!(spec.lut_path, Some(PathBuf::from("/luts/warm.cube")));
    }

    #[test]
    fn effect_spec_optional_magnitudes() {
        let spec = parse(
            json!({
                "effectId": "b",
                "effectType": "beautify",
                "intensity": 0.5,
                "requiresFaceDetection": false,
                "smoothing": 0.9
            }),
            effect_spec,
        )
        .unwrap();
        assert_eq!(spec.kind, EffectKind::Beautify);
        assert_eq!(spec.smoothing, Some(0.9));
        assert_eq!(spec.whitening, None);

        let err = parse(
            json!({ "effectId": "b", "effectType": 1, "intensity": 0.5 }),
            effect_spec,
        )
        .unwrap_err();
        assert!(err.to_string().contains("requiresFaceDetection"));
    }

    #[test]
    fn photo_stages_default_to_all() {
        assert_eq!(parse(json!({}), stages).unwrap(), Stages::ALL);
        assert_eq!(
            parse(json!({ "applyFilter": false }), stages).unwrap(),
            Stages {
                filter: false,
                effect: true
            }
        );
    }
}
