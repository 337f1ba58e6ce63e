//! Configuration management for the backup archiver.
//!
//! Loads configuration from a TOML file, falling back to built-in defaults.
//! All paths the pipeline writes to (staging, archive, database) live here;
//! nothing in the pipeline reads process-wide state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backup: BackupConfig,
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Staging directory for in-flight encrypted artifacts
    pub staging_root: PathBuf,

    /// Root of the dated archive tree
    pub archive_root: PathBuf,

    /// SQLite database holding per-file backup records
    pub db_path: PathBuf,

    /// Host identifier recorded on every backup record
    #[serde(default = "default_host")]
    pub host: String,

    /// Maximum number of files processed concurrently
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Directory of recipient public key files (*.pub)
    pub keyring_dir: PathBuf,

    /// Recipient identity, matched against key file names
    pub recipient: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

fn default_max_concurrent_files() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default() -> Self {
        Config {
            backup: BackupConfig {
                staging_root: PathBuf::from("/var/lib/backup-archiver/staging"),
                archive_root: PathBuf::from("/var/lib/backup-archiver/archive"),
                db_path: PathBuf::from("/var/lib/backup-archiver/records.db"),
                host: default_host(),
                max_concurrent_files: default_max_concurrent_files(),
            },
            encryption: EncryptionConfig {
                keyring_dir: PathBuf::from("/etc/backup-archiver/keys"),
                recipient: String::new(),
            },
            log: LogConfig::default(),
        }
    }
}
