//! Multipart storage clients
//!
//! [`StorageClient`] is the seam between the upload coordinator and the
//! object store. [`S3Storage`] talks to S3 or any S3-compatible endpoint;
//! `MemoryStorage` (feature `test-utils`) is an in-process stand-in.

use async_trait::async_trait;
use haul_core::types::{
    CannedAcl, ChunkDescriptor, CompletedPart, CompletionToken, ObjectKey, SessionToken,
};
use haul_core::Result;

pub mod s3;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use s3::S3Storage;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::{CallLog, MemoryStorage, PartFault};

/// Multipart upload primitives of an object store.
///
/// Every call may fail with a transient error (safe to retry) or a
/// permanent one.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Open a multipart upload and return its upload ID
    async fn initiate(&self, bucket: &str, key: &ObjectKey, acl: CannedAcl)
        -> Result<SessionToken>;

    /// Send one staged chunk with its `Content-MD5` and return the part ETag.
    ///
    /// Re-sending the same position with the same bytes is idempotent.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &ObjectKey,
        session: &SessionToken,
        chunk: &ChunkDescriptor,
    ) -> Result<CompletionToken>;

    /// Commit the upload. `parts` must be in ascending position order.
    async fn complete(
        &self,
        bucket: &str,
        key: &ObjectKey,
        session: &SessionToken,
        parts: &[CompletedPart],
    ) -> Result<()>;

    /// Discard the upload and any stored parts
    async fn abort(&self, bucket: &str, key: &ObjectKey, session: &SessionToken) -> Result<()>;

    /// Refresh connection and signing state on long-running uploads.
    /// Safe to call at any time.
    async fn refresh_clock_skew(&self) -> Result<()>;
}
