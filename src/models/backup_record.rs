//! Per-file backup records.
//!
//! One row per observed (file_path, mtime) pair. A file whose mtime changes
//! between runs gets a fresh row; earlier rows are never rewritten, so the
//! table is an append-only history of content versions. A row only ever
//! moves forward: created (empty encrypted_hash, not backed up), then
//! encrypted_hash set, then is_backed_up flipped.

use crate::Result;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub original_hash: String,
    pub encrypted_hash: String,
    pub file_name: String,
    pub file_path: String,
    /// Opaque serialized stat snapshot captured at scan time. Stored for
    /// audit purposes, never parsed by the pipeline.
    pub file_stat: String,
    pub archive_dir: String,
    pub host: String,
    pub mtime: i64,
    pub is_backed_up: bool,
    pub created_at: String,
    pub updated_at: String,
}

fn row_to_record(row: &Row) -> rusqlite::Result<BackupRecord> {
    Ok(BackupRecord {
        id: row.get("id")?,
        original_hash: row.get("original_hash")?,
        encrypted_hash: row.get("encrypted_hash")?,
        file_name: row.get("file_name")?,
        file_path: row.get("file_path")?,
        file_stat: row.get("file_stat")?,
        archive_dir: row.get("archive_dir")?,
        host: row.get("host")?,
        mtime: row.get("mtime")?,
        is_backed_up: row.get("is_backed_up")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Returns the committed record for this exact (path, mtime), if one exists.
/// A hit means the file version is already archived and can be skipped.
pub fn find_committed(conn: &Connection, path: &str, mtime: i64) -> Result<Option<BackupRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM backup_records WHERE file_path = ?1 AND mtime = ?2 AND is_backed_up = 1",
    )?;
    let mut rows = stmt.query_map(params![path, mtime], row_to_record)?;
    Ok(rows.next().transpose()?)
}

/// Returns any record (committed or not) for this exact (path, mtime).
/// An uncommitted hit is an interrupted earlier attempt to resume from.
pub fn find_any(conn: &Connection, path: &str, mtime: i64) -> Result<Option<BackupRecord>> {
    let mut stmt =
        conn.prepare("SELECT * FROM backup_records WHERE file_path = ?1 AND mtime = ?2")?;
    let mut rows = stmt.query_map(params![path, mtime], row_to_record)?;
    Ok(rows.next().transpose()?)
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<BackupRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM backup_records WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], row_to_record)?;
    Ok(rows.next().transpose()?)
}

pub struct NewRecord {
    pub original_hash: String,
    pub file_name: String,
    pub file_path: String,
    pub file_stat: String,
    pub archive_dir: String,
    pub host: String,
    pub mtime: i64,
}

/// Insert a record in its initial state: encrypted_hash empty, not backed up.
pub fn create(conn: &Connection, data: &NewRecord) -> Result<BackupRecord> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO backup_records (id, original_hash, file_name, file_path, file_stat, archive_dir, host, mtime)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            data.original_hash,
            data.file_name,
            data.file_path,
            data.file_stat,
            data.archive_dir,
            data.host,
            data.mtime
        ],
    )?;
    find_by_id(conn, &id)?
        .ok_or_else(|| crate::BackupError::Store("failed to read back created record".into()))
}

/// Record the artifact hash after a successful encryption.
pub fn set_encrypted_hash(conn: &Connection, id: &str, encrypted_hash: &str) -> Result<()> {
    conn.execute(
        "UPDATE backup_records SET encrypted_hash = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![encrypted_hash, id],
    )?;
    Ok(())
}

/// Flip the record to backed-up once the artifact is durably archived.
/// The guard on encrypted_hash keeps a committed row from ever pairing
/// is_backed_up with an empty artifact hash.
pub fn mark_committed(conn: &Connection, id: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE backup_records SET is_backed_up = 1, updated_at = datetime('now')
         WHERE id = ?1 AND encrypted_hash != ''",
        params![id],
    )?;
    if changed == 0 {
        return Err(crate::BackupError::Store(format!(
            "record {} cannot be committed without an encrypted hash",
            id
        )));
    }
    Ok(())
}
