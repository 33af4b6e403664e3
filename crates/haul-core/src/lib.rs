//! haul core library
//!
//! Core types, configuration and errors shared by the haul upload crates.

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use config::{Credentials, RetryPolicy, UploadConfig, UploadSettings};
pub use error::{Error, Result};

/// haul version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default S3 region
pub const DEFAULT_REGION: &str = "us-east-1";

/// Maximum number of parts in multipart upload
pub const MAX_PARTS: u32 = 10_000;

/// Default chunk size (100 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 100 * 1024 * 1024;
