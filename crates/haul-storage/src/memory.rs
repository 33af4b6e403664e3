//! In-process multipart service for tests
//!
//! Behaves like an S3 endpoint for the four multipart calls: it checks each
//! part's `Content-MD5` against the bytes it received, validates the commit
//! list and refuses empty commits. Faults and latency can be injected per
//! part position, and every call is recorded in a [`CallLog`].

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use haul_core::types::{
    CannedAcl, ChunkDescriptor, CompletedPart, CompletionToken, ObjectKey, SessionToken,
};
use haul_core::utils::{generate_etag, parse_etag};
use haul_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

use crate::StorageClient;

/// Injected failure for a part position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartFault {
    /// Fail with a transient error for the first `times` attempts
    Transient { times: u32 },
    /// Reject every attempt with a permanent error
    Permanent,
    /// Flip a byte in transit for the first `times` attempts, so the
    /// service-side digest check fails
    Corrupt { times: u32 },
}

/// Calls observed by the service
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    pub initiates: usize,
    /// Position of every `upload_part` attempt, in arrival order
    pub part_attempts: Vec<u32>,
    /// Positions of accepted parts, in completion order
    pub parts_accepted: Vec<u32>,
    /// Part lists of every `complete` call
    pub completes: Vec<Vec<CompletedPart>>,
    pub aborts: usize,
    pub refreshes: usize,
    /// Most `upload_part` calls ever in progress at once
    pub peak_in_flight: usize,
}

impl CallLog {
    pub fn attempts_for(&self, position: u32) -> usize {
        self.part_attempts.iter().filter(|p| **p == position).count()
    }
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    acl: CannedAcl,
}

#[derive(Debug, Default)]
struct Inner {
    next_upload: u64,
    uploads: HashMap<String, (PendingUpload, CannedAcl)>,
    objects: HashMap<(String, String), StoredObject>,
    part_faults: HashMap<u32, (PartFault, u32)>,
    latency: HashMap<u32, Duration>,
    initiate_fault: Option<bool>,
    complete_fault: Option<(PartFault, u32)>,
    abort_fails: bool,
    in_flight: usize,
    calls: CallLog,
}

/// In-memory [`StorageClient`]
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure for every upload of `position`
    pub fn fail_part(&self, position: u32, fault: PartFault) {
        self.inner.lock().part_faults.insert(position, (fault, 0));
    }

    /// Delay every upload of `position` before it is processed
    pub fn delay_part(&self, position: u32, delay: Duration) {
        self.inner.lock().latency.insert(position, delay);
    }

    /// Make `initiate` fail; `permanent` selects the error kind
    pub fn fail_initiate(&self, permanent: bool) {
        self.inner.lock().initiate_fault = Some(permanent);
    }

    /// Make `complete` fail. `Corrupt` is treated as `Permanent`.
    pub fn fail_complete(&self, fault: PartFault) {
        self.inner.lock().complete_fault = Some((fault, 0));
    }

    pub fn fail_abort(&self) {
        self.inner.lock().abort_fails = true;
    }

    pub fn calls(&self) -> CallLog {
        self.inner.lock().calls.clone()
    }

    /// Body of a committed object
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.inner
            .lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    pub fn object_etag(&self, bucket: &str, key: &str) -> Option<String> {
        self.inner
            .lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.etag.clone())
    }

    pub fn object_acl(&self, bucket: &str, key: &str) -> Option<CannedAcl> {
        self.inner
            .lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.acl)
    }

    /// Uploads neither completed nor aborted
    pub fn open_uploads(&self) -> usize {
        self.inner.lock().uploads.len()
    }
}

/// Counts one `upload_part` call as in progress until dropped
struct InFlight<'a>(&'a Mutex<Inner>);

impl<'a> InFlight<'a> {
    fn enter(inner: &'a Mutex<Inner>) -> Self {
        let mut guard = inner.lock();
        guard.in_flight += 1;
        guard.calls.peak_in_flight = guard.calls.peak_in_flight.max(guard.in_flight);
        Self(inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().in_flight -= 1;
    }
}

/// Apply a fault that has been hit `hits` times already.
/// Returns the error to raise and whether the payload should be corrupted.
fn trip(fault: PartFault, hits: u32, operation: &str) -> (Option<Error>, bool) {
    match fault {
        PartFault::Transient { times } if hits < times => (
            Some(Error::transient(operation, "injected: connection reset")),
            false,
        ),
        PartFault::Permanent => (
            Some(Error::permanent(operation, "injected: AccessDenied")),
            false,
        ),
        PartFault::Corrupt { times } if hits < times => (None, true),
        _ => (None, false),
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn initiate(
        &self,
        bucket: &str,
        key: &ObjectKey,
        acl: CannedAcl,
    ) -> Result<SessionToken> {
        let mut inner = self.inner.lock();
        inner.calls.initiates += 1;

        match inner.initiate_fault {
            Some(true) => {
                return Err(Error::permanent(
                    "CreateMultipartUpload",
                    "injected: NoSuchBucket",
                ))
            }
            Some(false) => {
                return Err(Error::transient(
                    "CreateMultipartUpload",
                    "injected: timeout",
                ))
            }
            None => {}
        }

        inner.next_upload += 1;
        let upload_id = format!("upload-{:04}", inner.next_upload);
        inner.uploads.insert(
            upload_id.clone(),
            (
                PendingUpload {
                    bucket: bucket.to_string(),
                    key: key.as_str().to_string(),
                    parts: BTreeMap::new(),
                },
                acl,
            ),
        );

        debug!("CreateMultipartUpload key={} uploadId={}", key, upload_id);
        Ok(SessionToken::new(upload_id))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &ObjectKey,
        session: &SessionToken,
        chunk: &ChunkDescriptor,
    ) -> Result<CompletionToken> {
        let _in_flight = InFlight::enter(&self.inner);
        let delay = {
            let mut inner = self.inner.lock();
            inner.calls.part_attempts.push(chunk.position);
            inner.latency.get(&chunk.position).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let data = tokio::fs::read(&chunk.path).await?;
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let corrupt = match inner.part_faults.get_mut(&chunk.position) {
            Some((fault, hits)) => {
                let (err, corrupt) = trip(*fault, *hits, "UploadPart");
                *hits += 1;
                if let Some(err) = err {
                    return Err(err);
                }
                corrupt
            }
            None => false,
        };

        let mut received = BytesMut::from(&data[..]);
        if corrupt {
            match received.first_mut() {
                Some(b) => *b ^= 0xFF,
                None => received.extend_from_slice(&[0]),
            }
        }
        let received = received.freeze();

        let expected = haul_crypto::content_md5_to_hex(chunk.checksum.as_str()).ok_or_else(|| {
            Error::permanent("UploadPart", "InvalidDigest: malformed Content-MD5")
        })?;
        let actual = haul_crypto::md5_hash(&received);
        if expected != actual {
            return Err(Error::ChecksumMismatch {
                position: chunk.position,
                message: "BadDigest: Content-MD5 does not match the received body".into(),
            });
        }

        let (upload, _) = inner
            .uploads
            .get_mut(session.as_str())
            .filter(|(u, _)| u.bucket == bucket && u.key == key.as_str())
            .ok_or_else(|| Error::permanent("UploadPart", "NoSuchUpload"))?;

        let etag = generate_etag(&actual);
        upload
            .parts
            .insert(chunk.position, (etag.clone(), received));
        inner.calls.parts_accepted.push(chunk.position);

        Ok(CompletionToken::new(etag))
    }

    async fn complete(
        &self,
        bucket: &str,
        key: &ObjectKey,
        session: &SessionToken,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.calls.completes.push(parts.to_vec());

        if let Some((fault, hits)) = inner.complete_fault.as_mut() {
            let fault = match *fault {
                PartFault::Corrupt { .. } => PartFault::Permanent,
                other => other,
            };
            let (err, _) = trip(fault, *hits, "CompleteMultipartUpload");
            *hits += 1;
            if let Some(err) = err {
                return Err(err);
            }
        }

        if parts.is_empty() {
            return Err(Error::permanent(
                "CompleteMultipartUpload",
                "MalformedXML: at least one part must be specified",
            ));
        }

        let (upload, acl) = inner
            .uploads
            .get(session.as_str())
            .filter(|(u, _)| u.bucket == bucket && u.key == key.as_str())
            .ok_or_else(|| Error::permanent("CompleteMultipartUpload", "NoSuchUpload"))?;

        let mut body = BytesMut::new();
        let mut etags = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            if part.position as usize != i + 1 {
                return Err(Error::permanent(
                    "CompleteMultipartUpload",
                    format!(
                        "InvalidPartOrder: expected part {} at index {}, got {}",
                        i + 1,
                        i,
                        part.position
                    ),
                ));
            }
            let (etag, data) = upload.parts.get(&part.position).ok_or_else(|| {
                Error::permanent(
                    "CompleteMultipartUpload",
                    format!("InvalidPart: part {} was never uploaded", part.position),
                )
            })?;
            if parse_etag(etag) != parse_etag(part.token.as_str()) {
                return Err(Error::permanent(
                    "CompleteMultipartUpload",
                    format!("InvalidPart: ETag mismatch for part {}", part.position),
                ));
            }
            body.extend_from_slice(data);
            etags.push(etag.clone());
        }

        let object = StoredObject {
            data: body.freeze(),
            etag: haul_crypto::multipart_etag(&etags, etags.len()),
            acl: *acl,
        };
        inner.uploads.remove(session.as_str());
        inner
            .objects
            .insert((bucket.to_string(), key.as_str().to_string()), object);

        debug!("CompleteMultipartUpload key={} uploadId={}", key, session);
        Ok(())
    }

    async fn abort(&self, _bucket: &str, key: &ObjectKey, session: &SessionToken) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.calls.aborts += 1;

        if inner.abort_fails {
            return Err(Error::transient(
                "AbortMultipartUpload",
                "injected: connection reset",
            ));
        }

        inner
            .uploads
            .remove(session.as_str())
            .ok_or_else(|| Error::permanent("AbortMultipartUpload", "NoSuchUpload"))?;

        debug!("AbortMultipartUpload key={} uploadId={}", key, session);
        Ok(())
    }

    async fn refresh_clock_skew(&self) -> Result<()> {
        self.inner.lock().calls.refreshes += 1;
        Ok(())
    }
}
