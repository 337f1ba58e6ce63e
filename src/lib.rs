//! Backup Archiver Library
//!
//! Incremental backup pipeline: scan a directory tree, encrypt changed files
//! for a configured recipient, and file the artifacts into a date-partitioned
//! archive, with per-file progress tracked in a SQLite metadata store.

pub mod archive;
pub mod config;
pub mod crypto;
pub mod db;
pub mod executor;
pub mod fs;
pub mod hasher;
pub mod models;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
