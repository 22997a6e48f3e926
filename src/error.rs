//! Error types shared across the cache, decoder and settings layers

use std::path::PathBuf;

/// Failure reported by a [`crate::cache::BitmapBackend`] while freeing an image.
///
/// The cache logs these and carries on; a failed recycle never reaches callers.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("image was already released by the platform")]
    AlreadyReleased,

    #[error("{detail}")]
    Platform { detail: String },
}

impl BackendError {
    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform { detail: msg.into() }
    }
}

/// Errors from tile decoders
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("page {page} is out of range")]
    PageOutOfRange { page: usize },

    #[error("tile region is empty")]
    EmptyRegion,

    #[error("decode cancelled")]
    Cancelled,

    #[error("renderer: {detail}")]
    Renderer { detail: String },
}

impl DecodeError {
    pub fn renderer(msg: impl Into<String>) -> Self {
        Self::Renderer { detail: msg.into() }
    }
}

/// Errors surfaced by the tile collector's public API
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("tile collector has been shut down")]
    ShutDown,

    #[error("failed to spawn {role} thread: {source}")]
    Spawn {
        role: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Errors loading or saving settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
