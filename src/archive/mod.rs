//! Committing staged artifacts into the archive tree.
//!
//! A commit is an atomic move from staging into the dated archive
//! directory, guarded by a free-space precondition. A destination that
//! already exists is a successful no-op so that a run crashing between the
//! move and the record update can simply be re-run.
//!
//! The move retries only transient I/O failures, a bounded number of times
//! with doubling backoff; permanent failures (bad destination, permission
//! denied) surface immediately and leave the record resumable.

use crate::fs::space;
use crate::{BackupError, Result};
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_MOVE_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;

/// Move a staged artifact to its final archive destination.
pub fn commit(artifact: &Path, destination: &Path) -> Result<()> {
    let artifact_size = std::fs::metadata(artifact)?.len();
    let dest_dir = destination.parent().ok_or_else(|| {
        BackupError::Archive(format!("destination has no parent: {}", destination.display()))
    })?;

    space::ensure_free_space(dest_dir, artifact_size)?;

    if destination.exists() {
        debug!("Already archived: {}", destination.display());
        return Ok(());
    }

    move_with_retry(artifact, destination)
}

fn move_with_retry(artifact: &Path, destination: &Path) -> Result<()> {
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    for attempt in 1..=MAX_MOVE_ATTEMPTS {
        match move_file(artifact, destination) {
            Ok(()) => return Ok(()),
            Err(e) if is_transient(&e) && attempt < MAX_MOVE_ATTEMPTS => {
                warn!(
                    "Transient error moving {} (attempt {}/{}): {}, retrying in {}ms",
                    artifact.display(),
                    attempt,
                    MAX_MOVE_ATTEMPTS,
                    e,
                    backoff_ms
                );
                std::thread::sleep(Duration::from_millis(backoff_ms));
                backoff_ms *= 2;
            }
            Err(e) => {
                return Err(BackupError::Archive(format!(
                    "{} -> {}: {}",
                    artifact.display(),
                    destination.display(),
                    e
                )));
            }
        }
    }

    unreachable!("retry loop always returns")
}

/// Rename when staging and archive share a filesystem; copy then rename
/// within the destination directory when they do not, so the artifact never
/// appears at its final path half-written.
fn move_file(artifact: &Path, destination: &Path) -> io::Result<()> {
    match std::fs::rename(artifact, destination) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32) => {
            let staged = destination.with_extension("partial");
            if let Err(copy_err) = std::fs::copy(artifact, &staged) {
                let _ = std::fs::remove_file(&staged);
                return Err(copy_err);
            }
            std::fs::rename(&staged, destination)?;
            std::fs::remove_file(artifact)
        }
        Err(e) => Err(e),
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_commit_moves_artifact() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("abc123");
        fs::write(&artifact, b"ciphertext").unwrap();

        let dest_dir = dir.path().join("2026/08/07");
        fs::create_dir_all(&dest_dir).unwrap();
        let destination = dest_dir.join("abc123");

        commit(&artifact, &destination).unwrap();
        assert!(destination.exists());
        assert!(!artifact.exists());
        assert_eq!(fs::read(&destination).unwrap(), b"ciphertext");
    }

    #[test]
    fn test_existing_destination_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("abc123");
        fs::write(&artifact, b"ciphertext").unwrap();

        let dest_dir = dir.path().join("archive");
        fs::create_dir_all(&dest_dir).unwrap();
        let destination = dest_dir.join("abc123");
        fs::write(&destination, b"already there").unwrap();

        commit(&artifact, &destination).unwrap();

        // No duplicate, no overwrite, staged artifact untouched
        assert_eq!(fs::read(&destination).unwrap(), b"already there");
        assert!(artifact.exists());
    }

    #[test]
    fn test_missing_destination_directory_is_permanent() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("abc123");
        fs::write(&artifact, b"ciphertext").unwrap();

        let destination = dir.path().join("archive/2026/08/07/abc123");
        let err = commit(&artifact, &destination).unwrap_err();
        assert!(matches!(err, BackupError::Io(_) | BackupError::Archive(_)));
        assert!(artifact.exists());
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_transient(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::NotFound)));
    }
}
