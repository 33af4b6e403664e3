//! Upload command implementation

use anyhow::{Context, Result};
use clap::Args;
use haul_core::types::CommittedUpload;
use haul_core::UploadConfig;
use haul_upload::Uploader;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, warn};

use super::{print_summary, OutputFormat, UploadOverrides};

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// File to upload
    pub file: PathBuf,

    #[command(flatten)]
    pub overrides: UploadOverrides,
}

pub async fn run(args: UploadArgs, mut config: UploadConfig, output: OutputFormat) -> Result<()> {
    args.overrides.apply(&mut config)?;
    let started = Instant::now();
    let committed = upload_file(&args.file, &config).await?;
    print_summary(&committed, started.elapsed(), output)
}

/// Upload `file` with the resolved configuration.
pub(crate) async fn upload_file(file: &Path, config: &UploadConfig) -> Result<CommittedUpload> {
    let uploader = Uploader::from_config(config).context("Invalid configuration")?;

    let report = uploader.run(file).await;
    if let Err(e) = &report.cleanup {
        warn!("Failed to remove staged parts: {}", e);
    }
    report.result.map_err(|e| {
        error!(code = e.code(), "Upload of {} failed: {}", file.display(), e);
        anyhow::Error::new(e).context(format!("Upload of {} failed", file.display()))
    })
}
