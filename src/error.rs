//! Error types for the dabbak library
//!
//! Errors returned from an operation are fatal to that operation: a missing
//! configuration, a destination that already exists, a state file that
//! cannot be written. Problems with individual files during a run are not
//! errors in this sense; they are collected as
//! [`FileIssue`](crate::types::FileIssue)s in the operation's report and the
//! run carries on.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the dabbak library
pub type Result<T> = std::result::Result<T, DabbakError>;

/// Main error type for all dabbak operations
#[derive(Debug, Error)]
pub enum DabbakError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Restore or package destination already exists
    #[error("Destination already exists: {0:?}")]
    DestinationExists(PathBuf),

    /// No snapshot directory at or before the requested day
    #[error("No snapshot found at or before {0}")]
    NoSnapshot(String),

    /// A recorded path is not beneath any configured source root
    #[error("Path could not be matched to a source root: {0:?}")]
    UnresolvedPrefix(PathBuf),

    /// A recorded path has no stored copy anywhere in the history
    #[error("Not found in backup: {0:?}")]
    NotFoundInBackup(PathBuf),

    /// Configuration file could not be found
    #[error("Configuration file not found: {0:?}")]
    ConfigNotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Timestamp is not a `YYYY-MM-DD` date
    #[error("Invalid timestamp '{0}', expected YYYY-MM-DD")]
    InvalidTimestamp(String),

    /// Size argument is not `N`, `Nk`, `Nm` or `Ng`
    #[error("Invalid size '{0}', expected N, Nk, Nm or Ng")]
    InvalidSize(String),

    /// Path is not valid UTF-8 and cannot be used as a state key
    #[error("Path conversion error: {0:?}")]
    PathConversion(std::ffi::OsString),
}

impl DabbakError {
    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        DabbakError::InvalidConfiguration(msg.into())
    }

    /// Check if this error is a refused precondition (nothing was written)
    pub fn is_precondition(&self) -> bool {
        matches!(self, DabbakError::DestinationExists(_))
    }

    /// Check if this error indicates that persisted state and stored data disagree
    pub fn is_inconsistency(&self) -> bool {
        matches!(
            self,
            DabbakError::UnresolvedPrefix(_) | DabbakError::NotFoundInBackup(_)
        )
    }

    /// Check if this error means the underlying path simply does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            DabbakError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            DabbakError::WalkDir(e) => e
                .io_error()
                .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound),
            _ => false,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            DabbakError::DestinationExists(path) => {
                format!(
                    "{:?} already exists. Choose a new destination (package also accepts --force).",
                    path
                )
            }
            DabbakError::NoSnapshot(day) => {
                format!(
                    "No snapshot exists at or before {}. Run 'dabbak backup' first or pick a later date.",
                    day
                )
            }
            DabbakError::ConfigNotFound(path) => {
                format!(
                    "Configuration file {:?} not found. Pass --config or set DABBAK_CONFIG.",
                    path
                )
            }
            _ => self.to_string(),
        }
    }
}
