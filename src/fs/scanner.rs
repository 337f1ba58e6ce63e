//! Lazy directory traversal for the backup pipeline.
//!
//! Yields regular files one at a time, depth-first. Directories are
//! traversed but not yielded; symlinks to directories are never followed
//! (cycle avoidance); symlinks to regular files are resolved and yielded.
//! An unreadable subtree surfaces as a per-entry error so one bad directory
//! cannot block backing up the rest of the tree.

use crate::{BackupError, Result};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A regular file discovered during scanning
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Full path to the file
    pub path: PathBuf,

    /// Base name of the file
    pub file_name: String,

    /// File size in bytes
    pub size: u64,

    /// Modification time (whole seconds since the Unix epoch)
    pub mtime: i64,
}

/// Lazy iterator over the regular files under a root directory.
///
/// Holds no resumption state: restarting a run simply re-scans from the
/// root, and the metadata store decides what still needs processing.
pub struct Scanner {
    inner: walkdir::IntoIter,
}

impl Scanner {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: WalkDir::new(root).follow_links(false).into_iter(),
        }
    }
}

impl Iterator for Scanner {
    type Item = Result<ScannedFile>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                // Unreadable entry or subtree: report it and keep walking
                Err(e) => return Some(Err(BackupError::Scan(e.to_string()))),
            };

            if entry.file_type().is_dir() {
                continue;
            }

            let metadata = if entry.file_type().is_symlink() {
                // Resolve the link target; skip it when the target is a
                // directory (not followed) or gone (broken link)
                match std::fs::metadata(entry.path()) {
                    Ok(resolved) if resolved.is_dir() => continue,
                    Ok(resolved) => resolved,
                    Err(_) => continue,
                }
            } else {
                match entry.metadata() {
                    Ok(metadata) => metadata,
                    Err(e) => return Some(Err(BackupError::Scan(e.to_string()))),
                }
            };

            // Sockets, fifos and devices are not backed up
            if !metadata.is_file() {
                continue;
            }

            return Some(Ok(ScannedFile {
                path: entry.path().to_path_buf(),
                file_name: entry.file_name().to_string_lossy().to_string(),
                size: metadata.len(),
                mtime: metadata.mtime(),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn scan_ok(root: &Path) -> Vec<ScannedFile> {
        Scanner::new(root).filter_map(|r| r.ok()).collect()
    }

    #[test]
    fn test_scan_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        assert_eq!(scan_ok(temp_dir.path()).len(), 0);
        Ok(())
    }

    #[test]
    fn test_scan_yields_files_not_directories() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"content1")?;
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"content2")?;

        let files = scan_ok(temp_dir.path());
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| !f.file_name.is_empty()));
        assert!(files.iter().all(|f| f.mtime > 0));
        Ok(())
    }

    #[test]
    fn test_scan_reports_size() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("file.txt"), b"12345")?;

        let files = scan_ok(temp_dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 5);
        Ok(())
    }

    #[test]
    fn test_symlinked_directory_is_not_followed() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("real"))?;
        fs::write(temp_dir.path().join("real/file.txt"), b"content")?;
        // Link back into the tree: following it would loop forever
        std::os::unix::fs::symlink(temp_dir.path(), temp_dir.path().join("real/loop"))?;

        let files = scan_ok(temp_dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name, "file.txt");
        Ok(())
    }

    #[test]
    fn test_symlinked_file_is_yielded() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::write(temp_dir.path().join("target.txt"), b"content")?;
        std::os::unix::fs::symlink(
            temp_dir.path().join("target.txt"),
            temp_dir.path().join("link.txt"),
        )?;

        let files = scan_ok(temp_dir.path());
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn test_broken_symlink_is_skipped() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::write(temp_dir.path().join("file.txt"), b"content")?;
        std::os::unix::fs::symlink(
            temp_dir.path().join("does-not-exist"),
            temp_dir.path().join("dangling"),
        )?;

        let files = scan_ok(temp_dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name, "file.txt");
        Ok(())
    }
}
