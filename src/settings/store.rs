use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::settings::types::EffectsConfig;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CAMFX_CONFIG";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Load a config from a JSON file, returning defaults when the file is missing.
pub fn load(path: &Path) -> Result<EffectsConfig, SettingsError> {
    if !path.exists() {
        return Ok(EffectsConfig::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: EffectsConfig =
        serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(config.sanitized())
}

/// Load from the file named by `CAMFX_CONFIG`, or defaults when unset.
pub fn load_from_env() -> Result<EffectsConfig, SettingsError> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            tracing::info!(path = %path.display(), "loading effects config");
            load(&path)
        }
        None => Ok(EffectsConfig::default()),
    }
}

/// Save a config to disk atomically (write .tmp then rename).
pub fn save(path: &Path, config: &EffectsConfig) -> Result<(), SettingsError> {
    let io_err = |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_string_pretty(config).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &json).map_err(io_err)?;
    std::fs::rename(&tmp_path, path).map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::types::FaceDetectionPolicy;
    use tempfile::TempDir;

    #[test]
    fn load_returns_default_when_file_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nonexistent.json");
        let result = load(&path).unwrap();
        assert_eq!(result, EffectsConfig::default());
    }

    #[test]
    fn load_parses_valid_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("camfx.json");
        std::fs::write(&path, r#"{"jpegQuality": 70, "landmarkMaxAgeMs": 100}"#).unwrap();

        let result = load(&path).unwrap();
        assert_eq!(result.jpeg_quality, 70);
        assert_eq!(result.landmark_max_age_ms, 100);
    }

    #[test]
    fn load_returns_error_for_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("camfx.json");
        std::fs::write(&path, "not valid json!!!").unwrap();

        assert!(matches!(load(&path), Err(SettingsError::Parse { .. })));
    }

    #[test]
    fn load_sanitizes_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("camfx.json");
        std::fs::write(&path, r#"{"queueCapacity": 0}"#).unwrap();

        assert_eq!(load(&path).unwrap().queue_capacity, 1);
    }

    #[test]
    fn save_round_trips_through_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("camfx.json");
        let config = EffectsConfig {
            face_detection_policy: FaceDetectionPolicy::AutoEnable,
            queue_capacity: 5,
            ..EffectsConfig::default()
        };
        save(&path, &config).unwrap();

        assert_eq!(load(&path).unwrap(), config);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
