//! Schema creation for the backup record table.

use crate::db::DbPool;
use crate::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS backup_records (
  id TEXT PRIMARY KEY,
  original_hash TEXT NOT NULL,
  encrypted_hash TEXT NOT NULL DEFAULT '',
  file_name TEXT NOT NULL,
  file_path TEXT NOT NULL,
  file_stat TEXT NOT NULL DEFAULT '',
  archive_dir TEXT NOT NULL,
  host TEXT NOT NULL,
  mtime INTEGER NOT NULL,
  is_backed_up INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_backup_records_path_mtime ON backup_records(file_path, mtime);
CREATE INDEX IF NOT EXISTS idx_backup_records_backed_up ON backup_records(is_backed_up);
"#;

pub fn migrate(pool: &DbPool) -> Result<()> {
    tracing::debug!("Running metadata store migration");
    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
