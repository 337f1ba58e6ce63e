//! Custom error types for the backup pipeline.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scan error: {0}")]
    Scan(String),

    #[error("Insufficient space in {location}: {needed} bytes needed, {available} available")]
    InsufficientSpace {
        location: PathBuf,
        needed: u64,
        available: u64,
    },

    #[error("Encryption error: {0}")]
    Encrypt(String),

    #[error("No public key matches recipient '{0}'")]
    KeyNotFound(String),

    #[error("Metadata store error: {0}")]
    Store(String),

    #[error("Archive commit failed: {0}")]
    Archive(String),
}

impl BackupError {
    /// Whether this error must abort the whole run rather than just the
    /// current file. A missing recipient key or an unreachable metadata
    /// store makes any further processing unsafe.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            BackupError::Config(_) | BackupError::KeyNotFound(_) | BackupError::Store(_)
        )
    }
}

impl From<rusqlite::Error> for BackupError {
    fn from(e: rusqlite::Error) -> Self {
        BackupError::Store(e.to_string())
    }
}

impl From<r2d2::Error> for BackupError {
    fn from(e: r2d2::Error) -> Self {
        BackupError::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
