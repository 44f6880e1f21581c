//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Manifest update failed: {0}")]
    ManifestFailed(String),

    #[error("Session error: {0}")]
    SessionFailed(String),

    #[error("Media error: {0}")]
    Media(#[from] admute_media::MediaError),

    #[error("ML service error: {0}")]
    Ml(#[from] admute_ml_client::MlError),

    #[error("Playlist error: {0}")]
    Playlist(#[from] admute_models::PlaylistError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn manifest_failed(msg: impl Into<String>) -> Self {
        Self::ManifestFailed(msg.into())
    }

    pub fn session_failed(msg: impl Into<String>) -> Self {
        Self::SessionFailed(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Io(_) | WorkerError::ManifestFailed(_) => true,
            WorkerError::Ml(e) => e.is_retryable(),
            WorkerError::Media(e) => matches!(
                e,
                admute_media::MediaError::Io(_) | admute_media::MediaError::Timeout(_)
            ),
            _ => false,
        }
    }
}
