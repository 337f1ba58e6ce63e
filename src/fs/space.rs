//! Free-space preconditions for staging and archive writes.
//!
//! Encryption output can be as large as its input, and a partial write on a
//! full disk is unrecoverable, so every write location is checked up front
//! rather than cleaned up after the fact.

use crate::{BackupError, Result};
use nix::sys::statvfs::statvfs;
use std::path::Path;

/// Free bytes available to unprivileged writers on the filesystem
/// holding `path`.
pub fn free_space(path: &Path) -> Result<u64> {
    let vfs = statvfs(path).map_err(|e| BackupError::Io(std::io::Error::from(e)))?;
    Ok(vfs.blocks_available() as u64 * vfs.fragment_size() as u64)
}

/// Fail unless the filesystem holding `location` has strictly more free
/// space than `needed` bytes.
pub fn ensure_free_space(location: &Path, needed: u64) -> Result<()> {
    let available = free_space(location)?;
    if available > needed {
        Ok(())
    } else {
        Err(BackupError::InsufficientSpace {
            location: location.to_path_buf(),
            needed,
            available,
        })
    }
}
