//! Backup Archiver - Main entry point
//!
//! Encrypts and archives a directory tree, one dated partition per run.

use anyhow::Result;
use backup_archiver::{executor::BackupRun, utils, Config};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Folder to back up
    folder: PathBuf,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = args.config {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting backup-archiver v{} (host: {})",
        env!("CARGO_PKG_VERSION"),
        config.backup.host
    );

    let run = BackupRun::new(config, chrono::Local::now())?;

    // First ctrl-c stops the scan and lets in-flight files finish; the
    // metadata store keeps everything else resumable
    let cancel = run.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight files");
            cancel.cancel();
        }
    });

    let report = run.run(&args.folder).await?;

    if report.failed > 0 || report.scan_errors > 0 {
        tracing::warn!(
            "Completed with {} failed files and {} scan errors",
            report.failed,
            report.scan_errors
        );
    }

    Ok(())
}
