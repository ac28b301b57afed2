use std::path::PathBuf;

use thiserror::Error;

/// Failures writing photos and recordings.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no preview surface with handle {0}")]
    UnknownSurface(u64),

    #[error("audio capture failed: {0}")]
    Audio(String),
}

impl OutputError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, OutputError>;
