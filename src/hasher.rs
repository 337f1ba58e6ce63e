//! Streaming content hashing.
//!
//! Used twice per file: once on the source for change detection, once on
//! the encrypted artifact for integrity and content-addressed naming.

use crate::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const CHUNK_SIZE: usize = 8192;

/// Compute the SHA-256 of a file's bytes as a lowercase hex string.
///
/// Reads in fixed-size chunks so memory stays bounded for arbitrarily
/// large files.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
