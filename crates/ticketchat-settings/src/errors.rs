//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// Settings file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The settings file is not valid JSON or has wrongly typed values.
    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        /// Settings file.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// The merged settings do not deserialize into [`ChatSettings`](crate::ChatSettings).
    #[error("settings do not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),

    /// A value is out of range. `key` is the camelCase JSON path.
    #[error("invalid {key}: {reason}")]
    Invalid {
        /// Offending key, e.g. `reconnect.maxAttempts`.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
