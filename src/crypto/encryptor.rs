//! File encryption into the staging area.
//!
//! Each source file is encrypted for the run's resolved recipient into the
//! staging directory, then renamed to the hex SHA-256 of its own ciphertext.
//! Content-addressed names decouple archive layout from source names and
//! make concurrent or repeated staging writes safe: a collision means
//! identical ciphertext.

use crate::fs::space;
use crate::{hasher, BackupError, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct Encryptor {
    recipient: age::x25519::Recipient,
    staging_root: PathBuf,
}

impl Encryptor {
    pub fn new(recipient: age::x25519::Recipient, staging_root: PathBuf) -> Self {
        Self {
            recipient,
            staging_root,
        }
    }

    /// Encrypt `source` into the staging area and return the path of the
    /// content-addressed artifact.
    ///
    /// The staging filesystem must have strictly more free space than the
    /// source is large; this is checked before a single byte is written,
    /// since a partial artifact on a full disk cannot be recovered.
    pub fn encrypt(&self, source: &Path) -> Result<PathBuf> {
        let source_size = std::fs::metadata(source)?.len();
        space::ensure_free_space(&self.staging_root, source_size)?;

        // Unique name until the ciphertext hash is known
        let temp_path = self.staging_root.join(format!("{}.tmp", Uuid::new_v4()));

        if let Err(e) = self.encrypt_to(source, &temp_path) {
            // Never leave a half-written artifact behind
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        let digest = hasher::hash_file(&temp_path)?;
        let artifact_path = self.staging_root.join(&digest);
        std::fs::rename(&temp_path, &artifact_path)?;

        Ok(artifact_path)
    }

    fn encrypt_to(&self, source: &Path, output: &Path) -> Result<()> {
        let encryptor =
            age::Encryptor::with_recipients(vec![Box::new(self.recipient.clone())])
                .ok_or_else(|| BackupError::Encrypt("no recipients".to_string()))?;

        let mut reader = BufReader::new(File::open(source)?);
        let writer = BufWriter::new(File::create(output)?);
        let mut stream = encryptor
            .wrap_output(writer)
            .map_err(|e| BackupError::Encrypt(e.to_string()))?;

        io::copy(&mut reader, &mut stream)?;
        let mut inner = stream.finish()?;
        inner.flush()?;

        Ok(())
    }
}
