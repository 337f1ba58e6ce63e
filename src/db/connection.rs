//! SQLite connection pooling for the metadata store.

use crate::Result;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Create a connection pool sized for the worker count.
///
/// WAL journaling plus a busy timeout lets concurrent per-file workers
/// update their own records without tripping over each other's writes.
pub fn create_pool(db_path: &Path, max_connections: u32) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path);
    let pool = Pool::builder().max_size(max_connections).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;
         PRAGMA busy_timeout = 5000;
         PRAGMA foreign_keys = ON;",
    )?;

    Ok(pool)
}
