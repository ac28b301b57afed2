use std::path::PathBuf;

use thiserror::Error;

/// Failures creating a filter or effect. Raised before anything enters the
/// pipeline, never mid-frame.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EffectError {
    #[error("unsupported {category} kind: {kind}")]
    UnsupportedKind { category: &'static str, kind: String },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("cannot load {path}: {reason}")]
    Asset { path: PathBuf, reason: String },

    #[error("shader error at {line}:{column}: {message}")]
    Shader {
        line: usize,
        column: usize,
        message: String,
    },
}

impl EffectError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EffectError>;
