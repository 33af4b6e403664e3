//! Configuration for haul
//!
//! Sources, lowest precedence first: built-in defaults, a TOML file,
//! environment variables, then command-line flags applied by the binary.
//!
//! Example config:
//! ```toml
//! bucket = "nightly-backups"
//! access_key = "AKIA..."
//! secret_key = "..."
//! region = "us-east-1"
//! acl = "private"
//! chunk_size_bytes = 104857600
//!
//! [retry]
//! max_retries = 3
//! ```

use crate::error::{Error, Result};
use crate::types::CannedAcl;
use bytesize::ByteSize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Smallest non-final part S3 accepts (5 MiB)
pub const MIN_SERVICE_PART_SIZE: u64 = 5 * 1024 * 1024;

const MIN_BUCKET_NAME_LENGTH: usize = 3;
const MAX_BUCKET_NAME_LENGTH: usize = 63;

/// Raw upload configuration, as read from file and environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Destination bucket
    pub bucket: Option<String>,

    /// Access key ID
    pub access_key: Option<String>,

    /// Secret access key
    pub secret_key: Option<String>,

    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,

    /// Canned ACL for the uploaded object
    #[serde(default)]
    pub acl: CannedAcl,

    /// Multipart chunk size (bytes)
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: u64,

    /// Custom S3 endpoint URL
    pub endpoint: Option<String>,

    /// Path style access (use path instead of virtual hosted style)
    #[serde(default = "default_true")]
    pub path_style: bool,

    /// Prefix prepended to the object key
    pub key_prefix: Option<String>,

    /// Maximum concurrent part uploads
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Seconds between client refreshes during long uploads
    #[serde(default = "default_clock_refresh_secs")]
    pub clock_refresh_secs: u64,

    /// Parent directory for staged chunks (system temp dir when unset)
    pub workspace_dir: Option<PathBuf>,
}

fn default_region() -> String {
    crate::DEFAULT_REGION.to_string()
}

fn default_chunk_size() -> u64 {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    10
}

fn default_clock_refresh_secs() -> u64 {
    300
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            access_key: None,
            secret_key: None,
            region: default_region(),
            acl: CannedAcl::default(),
            chunk_size_bytes: default_chunk_size(),
            endpoint: None,
            path_style: true,
            key_prefix: None,
            max_concurrent_requests: default_max_concurrent(),
            retry: RetryConfig::default(),
            clock_refresh_secs: default_clock_refresh_secs(),
            workspace_dir: None,
        }
    }
}

/// Retry settings for transient storage failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry (milliseconds)
    pub base_delay_ms: u64,
    /// Upper bound on any single delay (milliseconds)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl UploadConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            Error::Configuration(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }

    /// Defaults overlaid with the process environment
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from an optional file, then overlay the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Overlay values from `lookup`. For each setting the first variable
    /// present wins.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| {
            names
                .iter()
                .find_map(|n| lookup(*n).filter(|v| !v.is_empty()))
        };

        if let Some(bucket) = first(&["HAUL_BUCKET", "S3_BUCKET"]) {
            self.bucket = Some(bucket);
        }
        if let Some(key) = first(&["HAUL_ACCESS_KEY", "S3_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID"]) {
            self.access_key = Some(key);
        }
        if let Some(secret) = first(&[
            "HAUL_SECRET_KEY",
            "S3_SECRET_ACCESS_KEY",
            "AWS_SECRET_ACCESS_KEY",
        ]) {
            self.secret_key = Some(secret);
        }
        if let Some(region) = first(&["HAUL_REGION", "AWS_REGION"]) {
            self.region = region;
        }
        if let Some(endpoint) = first(&["HAUL_ENDPOINT", "AWS_ENDPOINT_URL"]) {
            self.endpoint = Some(endpoint);
        }
        if let Some(acl) = first(&["HAUL_ACL"]) {
            self.acl = acl.parse()?;
        }
        if let Some(size) = first(&["HAUL_CHUNK_SIZE"]) {
            self.chunk_size_bytes = parse_chunk_size(&size)?;
        }
        if let Some(n) = first(&["HAUL_MAX_CONCURRENT"]) {
            self.max_concurrent_requests = n.parse().map_err(|_| {
                Error::Configuration(format!("Invalid HAUL_MAX_CONCURRENT: {}", n))
            })?;
        }
        if let Some(prefix) = first(&["HAUL_KEY_PREFIX"]) {
            self.key_prefix = Some(prefix);
        }
        if let Some(dir) = first(&["HAUL_WORKSPACE_DIR"]) {
            self.workspace_dir = Some(PathBuf::from(dir));
        }

        Ok(())
    }

    /// Validate once and produce the settings the upload runs with.
    ///
    /// Every missing required option is reported in one error.
    pub fn resolve(&self) -> Result<UploadSettings> {
        let present = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        let bucket = present(&self.bucket);
        let access_key = present(&self.access_key);
        let secret_key = present(&self.secret_key);

        let mut missing = Vec::new();
        if bucket.is_none() {
            missing.push("bucket");
        }
        if access_key.is_none() {
            missing.push("access_key");
        }
        if secret_key.is_none() {
            missing.push("secret_key");
        }

        let (bucket, access_key, secret_key) = match (bucket, access_key, secret_key) {
            (Some(b), Some(a), Some(s)) => (b, a, s),
            _ => {
                return Err(Error::Configuration(format!(
                    "Missing required option(s): {}",
                    missing.join(", ")
                )))
            }
        };

        if bucket.len() < MIN_BUCKET_NAME_LENGTH || bucket.len() > MAX_BUCKET_NAME_LENGTH {
            return Err(Error::Configuration(format!(
                "Invalid bucket name: {} (must be {}-{} characters)",
                bucket, MIN_BUCKET_NAME_LENGTH, MAX_BUCKET_NAME_LENGTH
            )));
        }

        if self.region.trim().is_empty() {
            return Err(Error::Configuration("Region must not be empty".into()));
        }

        if self.chunk_size_bytes == 0 {
            return Err(Error::Configuration(
                "chunk_size_bytes must be at least 1".into(),
            ));
        }
        if self.chunk_size_bytes < MIN_SERVICE_PART_SIZE {
            warn!(
                "chunk_size_bytes={} is below 5 MiB; S3 rejects non-final parts that small",
                self.chunk_size_bytes
            );
        }

        if self.max_concurrent_requests == 0 {
            return Err(Error::Configuration(
                "max_concurrent_requests must be at least 1".into(),
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Configuration(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }

        Ok(UploadSettings {
            bucket,
            credentials: Credentials {
                access_key,
                secret_key,
            },
            region: self.region.trim().to_string(),
            acl: self.acl,
            chunk_size: self.chunk_size_bytes,
            endpoint: present(&self.endpoint),
            path_style: self.path_style,
            key_prefix: present(&self.key_prefix),
            max_concurrent_requests: self.max_concurrent_requests,
            retry: RetryPolicy {
                max_retries: self.retry.max_retries,
                base_delay: Duration::from_millis(self.retry.base_delay_ms),
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
            },
            clock_refresh_interval: Duration::from_secs(self.clock_refresh_secs),
            workspace_dir: self
                .workspace_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        })
    }
}

/// Parse a human chunk size such as `8388608`, `100MiB` or `64MB`.
///
/// `Ki`/`KiB`, `Mi`/`MiB` and so on are binary. `K`/`KB`, `M`/`MB` and so
/// on are decimal.
pub fn parse_chunk_size(input: &str) -> Result<u64> {
    input
        .trim()
        .parse::<ByteSize>()
        .map(|size| size.as_u64())
        .map_err(|e| Error::Configuration(format!("Invalid chunk size {:?}: {}", input, e)))
}

/// Static access credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let config = RetryConfig::default();
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Total attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

/// Validated settings for one upload run
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub bucket: String,
    pub credentials: Credentials,
    pub region: String,
    pub acl: CannedAcl,
    pub chunk_size: u64,
    pub endpoint: Option<String>,
    pub path_style: bool,
    pub key_prefix: Option<String>,
    pub max_concurrent_requests: usize,
    pub retry: RetryPolicy,
    pub clock_refresh_interval: Duration,
    pub workspace_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn complete_config() -> UploadConfig {
        UploadConfig {
            bucket: Some("nightly-backups".to_string()),
            access_key: Some("AKIDEXAMPLE".to_string()),
            secret_key: Some("wJalrXUtnFEMI".to_string()),
            ..UploadConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = UploadConfig::default();
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.acl, CannedAcl::Private);
        assert_eq!(config.chunk_size_bytes, 100 * 1024 * 1024);
        assert!(config.path_style);
    }

    #[test]
    fn test_resolve_reports_all_missing_options() {
        let err = UploadConfig::default().resolve().unwrap_err();
        match err {
            Error::Configuration(msg) => {
                assert!(msg.contains("bucket"));
                assert!(msg.contains("access_key"));
                assert!(msg.contains("secret_key"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_treats_blank_as_missing() {
        let mut config = complete_config();
        config.secret_key = Some("   ".to_string());
        assert!(matches!(config.resolve(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_resolve_rejects_invalid_values() {
        let mut config = complete_config();
        config.chunk_size_bytes = 0;
        assert!(config.resolve().is_err());

        let mut config = complete_config();
        config.max_concurrent_requests = 0;
        assert!(config.resolve().is_err());

        let mut config = complete_config();
        config.bucket = Some("ab".to_string());
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_resolve_success() {
        let settings = complete_config().resolve().unwrap();
        assert_eq!(settings.bucket, "nightly-backups");
        assert_eq!(settings.credentials.access_key, "AKIDEXAMPLE");
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.clock_refresh_interval, Duration::from_secs(300));
        let debug = format!("{:?}", settings.credentials);
        assert!(!debug.contains("wJalrXUtnFEMI"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_env_overlay_precedence() {
        let vars: HashMap<&str, &str> = [
            ("S3_BUCKET", "from-s3-var"),
            ("HAUL_BUCKET", "from-haul-var"),
            ("S3_ACCESS_KEY_ID", "access"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
            ("HAUL_CHUNK_SIZE", "10MiB"),
            ("HAUL_ACL", "bucket-owner-full-control"),
        ]
        .into_iter()
        .collect();

        let mut config = UploadConfig::default();
        config
            .apply_env_from(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.bucket.as_deref(), Some("from-haul-var"));
        assert_eq!(config.access_key.as_deref(), Some("access"));
        assert_eq!(config.secret_key.as_deref(), Some("secret"));
        assert_eq!(config.chunk_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.acl, CannedAcl::BucketOwnerFullControl);
    }

    #[test]
    fn test_env_overlay_rejects_bad_values() {
        let mut config = UploadConfig::default();
        let result = config.apply_env_from(|name| {
            (name == "HAUL_MAX_CONCURRENT").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("haul.toml");
        std::fs::write(
            &path,
            r#"
bucket = "nightly-backups"
access_key = "a"
secret_key = "s"
acl = "public-read"
chunk_size_bytes = 1048576

[retry]
max_retries = 5
base_delay_ms = 100
max_delay_ms = 1000
"#,
        )
        .unwrap();

        let config = UploadConfig::from_file(&path).unwrap();
        assert_eq!(config.acl, CannedAcl::PublicRead);
        assert_eq!(config.chunk_size_bytes, 1024 * 1024);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.region, "us-east-1");

        assert!(UploadConfig::from_file(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_from_file_partial_retry_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("haul.toml");
        std::fs::write(&path, "bucket = \"nightly-backups\"\n\n[retry]\nmax_retries = 3\n").unwrap();

        let config = UploadConfig::from_file(&path).unwrap();
        assert_eq!(config.bucket.as_deref(), Some("nightly-backups"));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.retry.max_delay_ms, 30_000);
    }

    #[test]
    fn test_parse_chunk_size() {
        assert_eq!(parse_chunk_size("1024").unwrap(), 1024);
        assert_eq!(parse_chunk_size("100MiB").unwrap(), 100 * 1024 * 1024);
        assert_eq!(parse_chunk_size(" 512KiB ").unwrap(), 512 * 1024);
        assert_eq!(parse_chunk_size("5MB").unwrap(), 5_000_000);
        assert_eq!(parse_chunk_size("1GiB").unwrap(), 1 << 30);

        assert!(matches!(parse_chunk_size(""), Err(Error::Configuration(_))));
        assert!(parse_chunk_size("lots").is_err());
        assert!(parse_chunk_size("10X").is_err());
    }

    #[test]
    fn test_retry_policy_backoff() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };
        assert_eq!(policy.max_attempts(), 6);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(1000));
    }
}
