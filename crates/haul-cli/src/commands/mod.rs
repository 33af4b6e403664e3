//! CLI command implementations

pub mod backup;
pub mod upload;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use haul_core::types::CommittedUpload;
use haul_core::config::parse_chunk_size;
use haul_core::UploadConfig;
use humansize::{format_size, BINARY};
use std::path::PathBuf;
use std::time::Duration;

/// Flags that override the file and environment configuration
#[derive(Args, Debug, Default)]
pub struct UploadOverrides {
    /// Destination bucket
    #[arg(short, long)]
    pub bucket: Option<String>,

    /// Prefix prepended to the object key
    #[arg(long)]
    pub key_prefix: Option<String>,

    /// Part size, e.g. 100MiB (binary) or 100MB (decimal)
    #[arg(long)]
    pub chunk_size: Option<String>,

    /// Canned ACL for the object
    #[arg(long)]
    pub acl: Option<String>,

    /// Maximum concurrent part uploads
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// S3 endpoint URL
    #[arg(long)]
    pub endpoint: Option<String>,

    /// AWS region
    #[arg(long)]
    pub region: Option<String>,

    /// Directory for staged parts
    #[arg(long)]
    pub workspace_dir: Option<PathBuf>,
}

impl UploadOverrides {
    pub fn apply(self, config: &mut UploadConfig) -> Result<()> {
        if let Some(bucket) = self.bucket {
            config.bucket = Some(bucket);
        }
        if let Some(prefix) = self.key_prefix {
            config.key_prefix = Some(prefix);
        }
        if let Some(size) = self.chunk_size {
            config.chunk_size_bytes = parse_chunk_size(&size)
                .with_context(|| format!("Invalid --chunk-size {}", size))?;
        }
        if let Some(acl) = self.acl {
            config.acl = acl.parse().with_context(|| format!("Invalid --acl {}", acl))?;
        }
        if let Some(n) = self.concurrency {
            config.max_concurrent_requests = n;
        }
        if let Some(endpoint) = self.endpoint {
            config.endpoint = Some(endpoint);
        }
        if let Some(region) = self.region {
            config.region = region;
        }
        if let Some(dir) = self.workspace_dir {
            config.workspace_dir = Some(dir);
        }
        Ok(())
    }
}

/// How the final summary is printed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print a summary of a committed upload
pub fn print_summary(committed: &CommittedUpload, elapsed: Duration, format: OutputFormat) -> Result<()> {
    let secs = elapsed.as_secs_f64().max(0.001);

    if format == OutputFormat::Json {
        let mut value = serde_json::to_value(committed)?;
        value["elapsed_secs"] = serde_json::json!(secs);
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let rate = (committed.bytes as f64 / secs) as u64;
    println!(
        "Uploaded s3://{}/{} ({} in {} part(s), {:.1}s, {}/s)",
        committed.bucket,
        committed.key,
        format_size(committed.bytes, BINARY),
        committed.parts,
        secs,
        format_size(rate, BINARY)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use haul_core::types::CannedAcl;

    #[test]
    fn test_overrides_apply() {
        let mut config = UploadConfig::default();
        UploadOverrides {
            bucket: Some("nightly-backups".into()),
            chunk_size: Some("8MiB".into()),
            acl: Some("public-read".into()),
            concurrency: Some(3),
            ..Default::default()
        }
        .apply(&mut config)
        .unwrap();

        assert_eq!(config.bucket.as_deref(), Some("nightly-backups"));
        assert_eq!(config.chunk_size_bytes, 8 * 1024 * 1024);
        assert_eq!(config.acl, CannedAcl::PublicRead);
        assert_eq!(config.max_concurrent_requests, 3);
        assert_eq!(config.region, "us-east-1");
    }

    #[test]
    fn test_overrides_reject_bad_values() {
        let mut config = UploadConfig::default();
        let bad_size = UploadOverrides {
            chunk_size: Some("lots".into()),
            ..Default::default()
        };
        assert!(bad_size.apply(&mut config).is_err());

        let bad_acl = UploadOverrides {
            acl: Some("everyone".into()),
            ..Default::default()
        };
        assert!(bad_acl.apply(&mut config).is_err());
    }
}
