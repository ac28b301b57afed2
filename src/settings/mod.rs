// Session tunables and their JSON persistence.

pub mod store;
pub mod types;

pub use store::{load, load_from_env, save, SettingsError, CONFIG_ENV};
pub use types::{EffectsConfig, FaceDetectionPolicy};
