//! Recipient key resolution.
//!
//! The keyring is a directory of `*.pub` files, each holding one age X25519
//! public key. The configured recipient identity matches a key when it is a
//! substring of the key's file stem, e.g. identity "ops" matches
//! `ops-backups.pub`. Resolution happens once per run; no match is fatal
//! since no file could be safely encrypted.

use crate::{BackupError, Result};
use std::path::Path;
use tracing::warn;

/// Find the public key for a recipient identity in the keyring directory.
pub fn resolve_recipient(keyring_dir: &Path, identity: &str) -> Result<age::x25519::Recipient> {
    if identity.is_empty() {
        return Err(BackupError::Config(
            "no recipient identity configured".to_string(),
        ));
    }

    for entry in std::fs::read_dir(keyring_dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some("pub") {
            continue;
        }
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem,
            None => continue,
        };
        if !stem.contains(identity) {
            continue;
        }

        match parse_key_file(&path) {
            Ok(recipient) => return Ok(recipient),
            Err(e) => {
                warn!("Skipping unparseable key file {}: {}", path.display(), e);
                continue;
            }
        }
    }

    Err(BackupError::KeyNotFound(identity.to_string()))
}

fn parse_key_file(path: &Path) -> Result<age::x25519::Recipient> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .ok_or_else(|| BackupError::Encrypt(format!("empty key file: {}", path.display())))?
        .parse::<age::x25519::Recipient>()
        .map_err(|e| BackupError::Encrypt(format!("invalid key in {}: {}", path.display(), e)))
}
