//! Backup command implementation
//!
//! Dumps a PostgreSQL database with `pg_dump` in custom format, uploads the
//! dump and deletes it whatever the outcome.

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Args;
use haul_core::UploadConfig;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;
use tracing::{info, warn};

use super::{print_summary, upload::upload_file, OutputFormat, UploadOverrides};

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Database to dump
    #[arg(short, long, env = "PG_DBNAME")]
    pub database: String,

    /// pg_dump executable
    #[arg(long, default_value = "pg_dump")]
    pub pg_dump: String,

    /// Directory for the dump file (defaults to the workspace directory)
    #[arg(long)]
    pub dump_dir: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: UploadOverrides,
}

/// `<database>_<YYYY-mm-dd_HH-MM-SS>_dump.bak`
fn dump_file_name(database: &str, datestamp: &str) -> String {
    format!("{}_{}_dump.bak", database, datestamp)
}

async fn remove_dump(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("Removed dump {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove dump {}: {}", path.display(), e),
    }
}

pub async fn run(args: BackupArgs, mut config: UploadConfig, output: OutputFormat) -> Result<()> {
    args.overrides.apply(&mut config)?;
    // Fail on bad configuration before spending time on the dump
    let settings = config.resolve().context("Invalid configuration")?;

    let dump_dir = args.dump_dir.unwrap_or(settings.workspace_dir);
    tokio::fs::create_dir_all(&dump_dir)
        .await
        .with_context(|| format!("Failed to create {}", dump_dir.display()))?;

    let datestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let dump = dump_dir.join(dump_file_name(&args.database, &datestamp));

    info!("Dumping database {} to {}", args.database, dump.display());
    let started = Instant::now();
    let status = Command::new(&args.pg_dump)
        .arg("--no-privileges")
        .arg(format!("--file={}", dump.display()))
        .arg("-Fc")
        .arg(&args.database)
        .status()
        .await
        .with_context(|| format!("Failed to run {}", args.pg_dump))?;

    if !status.success() {
        remove_dump(&dump).await;
        bail!("{} exited with {}", args.pg_dump, status);
    }
    info!("Dump finished in {:.1}s", started.elapsed().as_secs_f64());

    let started = Instant::now();
    let result = upload_file(&dump, &config).await;
    remove_dump(&dump).await;

    let committed = result?;
    print_summary(&committed, started.elapsed(), output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_file_name() {
        assert_eq!(
            dump_file_name("app_production", "2026-10-18_02-00-00"),
            "app_production_2026-10-18_02-00-00_dump.bak"
        );
    }

    #[tokio::test]
    async fn test_remove_dump_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("db_dump.bak");
        std::fs::write(&dump, b"PGDMP").unwrap();

        remove_dump(&dump).await;
        assert!(!dump.exists());
        remove_dump(&dump).await;
    }
}
