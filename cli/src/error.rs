//! Unified error handling for the sync tool.

use crate::config::ConfigError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sync error: {0}")]
    Engine(#[from] shelfsync_engine::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("calibredb executable not found; install Calibre or set CALIBREDB_PATH")]
    CalibredbNotFound,

    #[error("Sync task ended without reporting a result")]
    TaskAborted,
}

impl AppError {
    /// Whether the failure came from the engine and aborts the run.
    pub fn is_fatal_sync_error(&self) -> bool {
        matches!(self, AppError::Engine(e) if e.is_fatal())
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;
