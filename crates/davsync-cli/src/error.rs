//! CLI error types.

use davsync_engine::{SecretError, StoreError, SyncError};
use thiserror::Error;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Bad command-line input.
    #[error("invalid input: {0}")]
    Input(String),

    /// Unknown connection or calendar.
    #[error("{0} not found")]
    NotFound(String),

    /// Some calendars or connections failed; the rest synced.
    #[error("{failed} of {total} sync units failed")]
    Incomplete { failed: usize, total: usize },

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("state file error: {0}")]
    Store(#[from] StoreError),

    #[error("master key error: {0}")]
    Secret(#[from] SecretError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for this error.
    ///
    /// 2 for usage and configuration problems, 3 when the connection needs
    /// new credentials, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Input(_) | Self::NotFound(_) => 2,
            Self::Sync(e) if e.requires_reauth() => 3,
            Self::Sync(SyncError::Configuration { .. }) => 2,
            _ => 1,
        }
    }
}
