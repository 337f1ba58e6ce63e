//! Backup run orchestration.
//!
//! Drives each scanned file through the pipeline: look up its record,
//! hash, encrypt into staging, verify-hash the artifact, commit it into
//! the dated archive partition, and flip the record to backed-up. Files
//! are independent of each other, so a bounded pool of workers runs them
//! concurrently; one file failing never stops the run, only a missing
//! recipient key or a dead metadata store does.

use crate::config::Config;
use crate::crypto::{keyring, Encryptor};
use crate::db::{connection::create_pool, migrate::migrate, DbPool};
use crate::fs::metadata::StatSnapshot;
use crate::fs::scanner::{ScannedFile, Scanner};
use crate::models::backup_record::{self, NewRecord};
use crate::{archive, hasher, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counts reported at the end of a run
#[derive(Debug, Default)]
pub struct RunReport {
    pub scanned: usize,
    pub skipped: usize,
    pub backed_up: usize,
    pub failed: usize,
    pub scan_errors: usize,
    pub bytes_backed_up: u64,
    pub duration_secs: u64,
}

enum Outcome {
    /// Already committed in an earlier run
    Skipped,
    /// Newly archived, with the source size in bytes
    BackedUp(u64),
}

/// Everything a worker needs to process one file
struct PipelineContext {
    pool: DbPool,
    encryptor: Encryptor,
    partition: String,
    partition_dir: PathBuf,
    host: String,
}

/// A configured backup run over one source tree.
pub struct BackupRun {
    context: Arc<PipelineContext>,
    max_concurrent_files: usize,
    cancel: CancellationToken,
}

impl std::fmt::Debug for BackupRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupRun")
            .field("partition", &self.context.partition)
            .field("max_concurrent_files", &self.max_concurrent_files)
            .finish()
    }
}

impl BackupRun {
    /// Prepare a run: resolve the recipient key, create the staging and
    /// dated archive directories, and open the metadata store. Each of
    /// these failing is fatal before any file is touched.
    pub fn new(config: Config, started_at: DateTime<Local>) -> Result<Self> {
        let recipient =
            keyring::resolve_recipient(&config.encryption.keyring_dir, &config.encryption.recipient)?;

        let partition = started_at.format("%Y/%m/%d").to_string();
        let partition_dir = config.backup.archive_root.join(&partition);
        std::fs::create_dir_all(&partition_dir)?;
        std::fs::create_dir_all(&config.backup.staging_root)?;

        let pool = create_pool(
            &config.backup.db_path,
            config.backup.max_concurrent_files.max(1) as u32,
        )?;
        migrate(&pool)?;

        let encryptor = Encryptor::new(recipient, config.backup.staging_root.clone());

        Ok(Self {
            context: Arc::new(PipelineContext {
                pool,
                encryptor,
                partition,
                partition_dir,
                host: config.backup.host.clone(),
            }),
            max_concurrent_files: config.backup.max_concurrent_files.max(1),
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the scan loop when cancelled. Files already in
    /// flight finish; everything else stays resumable in the store.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Scan `root` and drive every regular file through the pipeline.
    pub async fn run(&self, root: &Path) -> Result<RunReport> {
        let started = Instant::now();
        info!(
            "Starting backup of {} into partition {} ({} workers)",
            root.display(),
            self.context.partition,
            self.max_concurrent_files
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_files));
        let mut tasks: JoinSet<(PathBuf, Result<Outcome>)> = JoinSet::new();
        let mut report = RunReport::default();
        let mut fatal = None;

        for item in Scanner::new(root) {
            if self.cancel.is_cancelled() {
                warn!("Run cancelled, stopping scan");
                break;
            }

            let file = match item {
                Ok(file) => file,
                Err(e) => {
                    warn!("{}", e);
                    report.scan_errors += 1;
                    continue;
                }
            };
            report.scanned += 1;

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let context = self.context.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let path = file.path.clone();
                let result = tokio::task::spawn_blocking(move || process_file(&context, &file))
                    .await
                    .unwrap_or_else(|e| {
                        Err(crate::BackupError::Io(std::io::Error::other(e.to_string())))
                    });
                (path, result)
            });

            // Fold in whatever has already finished so a fatal store
            // failure stops the scan promptly
            while let Some(joined) = tasks.try_join_next() {
                self.absorb(joined, &mut report, &mut fatal);
            }
            if fatal.is_some() {
                break;
            }
        }

        while let Some(joined) = tasks.join_next().await {
            self.absorb(joined, &mut report, &mut fatal);
        }

        report.duration_secs = started.elapsed().as_secs();

        if let Some(e) = fatal {
            error!("Run aborted: {}", e);
            return Err(e);
        }

        info!(
            "Backup finished: {} scanned, {} backed up ({} bytes), {} already archived, {} failed, {} scan errors in {}s",
            report.scanned,
            report.backed_up,
            report.bytes_backed_up,
            report.skipped,
            report.failed,
            report.scan_errors,
            report.duration_secs
        );
        Ok(report)
    }

    fn absorb(
        &self,
        joined: std::result::Result<(PathBuf, Result<Outcome>), tokio::task::JoinError>,
        report: &mut RunReport,
        fatal: &mut Option<crate::BackupError>,
    ) {
        let (path, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                error!("Worker task failed: {}", e);
                report.failed += 1;
                return;
            }
        };

        match result {
            Ok(Outcome::Skipped) => {
                debug!("Already archived: {}", path.display());
                report.skipped += 1;
            }
            Ok(Outcome::BackedUp(bytes)) => {
                report.backed_up += 1;
                report.bytes_backed_up += bytes;
            }
            Err(e) if e.is_run_fatal() => {
                self.cancel.cancel();
                if fatal.is_none() {
                    *fatal = Some(e);
                }
                report.failed += 1;
            }
            Err(e) => {
                error!("Failed to back up {}: {}", path.display(), e);
                report.failed += 1;
            }
        }
    }
}

/// The per-file state machine. Runs on a blocking thread.
fn process_file(ctx: &PipelineContext, file: &ScannedFile) -> Result<Outcome> {
    let path_str = file.path.to_string_lossy().to_string();

    // Committed record for this exact (path, mtime): nothing to do.
    // This is what makes re-runs idempotent.
    {
        let conn = ctx.pool.get()?;
        if backup_record::find_committed(&conn, &path_str, file.mtime)?.is_some() {
            return Ok(Outcome::Skipped);
        }
    }

    // Resume an interrupted earlier attempt when any record exists,
    // reusing its source hash; otherwise hash the source and create one.
    let record = {
        let conn = ctx.pool.get()?;
        match backup_record::find_any(&conn, &path_str, file.mtime)? {
            Some(record) => record,
            None => {
                let original_hash = hasher::hash_file(&file.path)?;
                let file_stat = StatSnapshot::from_path(&file.path)?.to_json();
                backup_record::create(
                    &conn,
                    &NewRecord {
                        original_hash,
                        file_name: file.file_name.clone(),
                        file_path: path_str.clone(),
                        file_stat,
                        archive_dir: ctx.partition.clone(),
                        host: ctx.host.clone(),
                        mtime: file.mtime,
                    },
                )?
            }
        }
    };

    info!("Backing up {}", path_str);

    let artifact = ctx.encryptor.encrypt(&file.path)?;
    let encrypted_hash = hasher::hash_file(&artifact)?;
    {
        let conn = ctx.pool.get()?;
        backup_record::set_encrypted_hash(&conn, &record.id, &encrypted_hash)?;
    }

    let destination = ctx.partition_dir.join(&encrypted_hash);
    archive::commit(&artifact, &destination)?;

    {
        let conn = ctx.pool.get()?;
        backup_record::mark_committed(&conn, &record.id)?;
    }

    Ok(Outcome::BackedUp(file.size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackupConfig, EncryptionConfig, LogConfig};
    use crate::BackupError;
    use rusqlite::Connection;
    use std::fs;
    use tempfile::TempDir;

    fn test_config(dir: &Path, recipient: &str) -> Config {
        Config {
            backup: BackupConfig {
                staging_root: dir.join("staging"),
                archive_root: dir.join("archive"),
                db_path: dir.join("records.db"),
                host: "test-host".to_string(),
                max_concurrent_files: 2,
            },
            encryption: EncryptionConfig {
                keyring_dir: dir.join("keys"),
                recipient: recipient.to_string(),
            },
            log: LogConfig::default(),
        }
    }

    fn write_keyring(dir: &Path) {
        fs::create_dir_all(dir.join("keys")).unwrap();
        let key = age::x25519::Identity::generate().to_public().to_string();
        fs::write(dir.join("keys/ops-backups.pub"), key).unwrap();
    }

    fn record_rows(db_path: &Path) -> Vec<(String, String, bool)> {
        let conn = Connection::open(db_path).unwrap();
        let mut stmt = conn
            .prepare("SELECT file_path, encrypted_hash, is_backed_up FROM backup_records")
            .unwrap();
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .unwrap();
        rows.filter_map(|r| r.ok()).collect()
    }

    fn archived_files(archive_root: &Path) -> Vec<PathBuf> {
        walkdir::WalkDir::new(archive_root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_end_to_end_backup() {
        let dir = TempDir::new().unwrap();
        write_keyring(dir.path());

        let source = dir.path().join("source");
        fs::create_dir_all(source.join("nested")).unwrap();
        fs::write(source.join("a.txt"), b"file a contents").unwrap();
        fs::write(source.join("nested/b.txt"), b"file b contents").unwrap();

        let config = test_config(dir.path(), "ops");
        let run = BackupRun::new(config.clone(), Local::now()).unwrap();
        let report = run.run(&source).await.unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.backed_up, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.skipped, 0);

        // One committed record per file, each with both hashes set
        let rows = record_rows(&config.backup.db_path);
        assert_eq!(rows.len(), 2);
        for (_, encrypted_hash, is_backed_up) in &rows {
            assert!(is_backed_up);
            assert!(!encrypted_hash.is_empty());
        }

        // Each artifact sits in the dated partition under its own hash
        let archived = archived_files(&config.backup.archive_root);
        assert_eq!(archived.len(), 2);
        for artifact in &archived {
            let name = artifact.file_name().unwrap().to_string_lossy().to_string();
            assert_eq!(name, crate::hasher::hash_file(artifact).unwrap());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_run_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write_keyring(dir.path());

        let source = dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.txt"), b"file a contents").unwrap();

        let config = test_config(dir.path(), "ops");

        let run = BackupRun::new(config.clone(), Local::now()).unwrap();
        let first = run.run(&source).await.unwrap();
        assert_eq!(first.backed_up, 1);

        let run = BackupRun::new(config.clone(), Local::now()).unwrap();
        let second = run.run(&source).await.unwrap();
        assert_eq!(second.backed_up, 0);
        assert_eq!(second.skipped, 1);

        // No duplicate artifacts, no new records
        assert_eq!(archived_files(&config.backup.archive_root).len(), 1);
        assert_eq!(record_rows(&config.backup.db_path).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_changed_mtime_is_a_new_version() {
        let dir = TempDir::new().unwrap();
        write_keyring(dir.path());

        let source = dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.txt"), b"first contents").unwrap();

        let config = test_config(dir.path(), "ops");
        let run = BackupRun::new(config.clone(), Local::now()).unwrap();
        run.run(&source).await.unwrap();

        let before = record_rows(&config.backup.db_path);
        assert_eq!(before.len(), 1);

        // mtime is tracked in whole seconds, so cross a second boundary
        std::thread::sleep(std::time::Duration::from_millis(1100));
        fs::write(source.join("a.txt"), b"second contents").unwrap();

        let run = BackupRun::new(config.clone(), Local::now()).unwrap();
        let report = run.run(&source).await.unwrap();
        assert_eq!(report.backed_up, 1);

        // A second record exists and the first is untouched
        let after = record_rows(&config.backup.db_path);
        assert_eq!(after.len(), 2);
        assert!(after.iter().all(|(_, hash, committed)| {
            *committed && !hash.is_empty()
        }));
        assert_eq!(archived_files(&config.backup.archive_root).len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unknown_recipient_fails_before_any_record() {
        let dir = TempDir::new().unwrap();
        write_keyring(dir.path());

        let source = dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.txt"), b"file a contents").unwrap();

        let config = test_config(dir.path(), "finance");
        let err = BackupRun::new(config.clone(), Local::now()).unwrap_err();
        assert!(matches!(err, BackupError::KeyNotFound(_)));

        // The run never got far enough to open the store
        assert!(!config.backup.db_path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_commit_failure_leaves_record_resumable() {
        let dir = TempDir::new().unwrap();
        write_keyring(dir.path());

        let source = dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.txt"), b"file a contents").unwrap();

        let config = test_config(dir.path(), "ops");
        let run = BackupRun::new(config.clone(), Local::now()).unwrap();

        // Destination partition vanishes between startup and commit
        fs::remove_dir_all(&config.backup.archive_root).unwrap();

        let report = run.run(&source).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.backed_up, 0);

        // The record advanced to encrypted but never to committed, and the
        // staged artifact is still in place for the next run
        let rows = record_rows(&config.backup.db_path);
        assert_eq!(rows.len(), 1);
        let (_, encrypted_hash, is_backed_up) = &rows[0];
        assert!(!is_backed_up);
        assert!(!encrypted_hash.is_empty());
        assert!(config.backup.staging_root.join(encrypted_hash).exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resumed_run_completes_after_commit_failure() {
        let dir = TempDir::new().unwrap();
        write_keyring(dir.path());

        let source = dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.txt"), b"file a contents").unwrap();

        let config = test_config(dir.path(), "ops");

        let run = BackupRun::new(config.clone(), Local::now()).unwrap();
        fs::remove_dir_all(&config.backup.archive_root).unwrap();
        assert_eq!(run.run(&source).await.unwrap().failed, 1);

        // Next run re-creates the partition and finishes the file
        let run = BackupRun::new(config.clone(), Local::now()).unwrap();
        let report = run.run(&source).await.unwrap();
        assert_eq!(report.backed_up, 1);
        assert_eq!(report.failed, 0);

        let rows = record_rows(&config.backup.db_path);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].2);
    }
}
