//! Error types for the controller layer.

use std::time::Duration;

use nt_audio::AudioError;
use nt_formats::FormatError;
use thiserror::Error;

/// Why an instrument's resources failed to load.
///
/// `Clone` so one failed shared load can be handed to every waiter.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum LoadError {
    #[error("load timed out after {0:?}")]
    Timeout(Duration),
    #[error("fetching {id:?} failed: {reason}")]
    Fetch { id: String, reason: String },
    #[error("decoding {id:?} failed: {reason}")]
    Decode { id: String, reason: String },
    #[error("preset {name:?} is invalid: {reason}")]
    Preset { name: String, reason: String },
    #[error("load cancelled")]
    Cancelled,
}

impl LoadError {
    pub(crate) fn decode(id: &str, err: FormatError) -> Self {
        LoadError::Decode { id: id.to_string(), reason: err.to_string() }
    }
}

/// Errors from reading a session configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Errors surfaced by [`crate::Session`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// No audio context has been activated.
    #[error("audio context not active")]
    NoContext,
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
