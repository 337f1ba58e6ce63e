//! Stat snapshot capture.
//!
//! The full filesystem metadata of a source file is serialized onto its
//! backup record at scan time. The pipeline itself never reads it back;
//! it exists so an operator can later answer what the file looked like
//! when it was archived.

use serde::{Deserialize, Serialize};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Point-in-time snapshot of a file's stat fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatSnapshot {
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl StatSnapshot {
    /// Capture a snapshot from a file path
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self {
            size: metadata.len(),
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            nlink: metadata.nlink(),
            atime: metadata.atime(),
            mtime: metadata.mtime(),
            ctime: metadata.ctime(),
        })
    }

    /// Serialize for opaque storage on a backup record
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
