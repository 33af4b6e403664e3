//! Parallel multipart upload with an ordered commit
//!
//! One task per chunk runs on a pool bounded by a semaphore. All tasks are
//! joined before anything is committed. If every part was accepted the
//! completion tokens are committed in ascending position order; otherwise
//! the upload is aborted exactly once and the most relevant part failure
//! is returned.

use futures::future::join_all;
use haul_core::types::{
    CannedAcl, ChunkDescriptor, ChunkUploadResult, CommittedUpload, ObjectKey, SessionToken,
    UploadSession, UploadState,
};
use haul_core::{Error, Result, RetryPolicy, UploadSettings};
use haul_storage::StorageClient;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Tuning for one coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_concurrent_requests: usize,
    pub retry: RetryPolicy,
    /// Minimum time between client refreshes inside workers
    pub clock_refresh_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            retry: RetryPolicy::default(),
            clock_refresh_interval: Duration::from_secs(300),
        }
    }
}

impl From<&UploadSettings> for CoordinatorConfig {
    fn from(settings: &UploadSettings) -> Self {
        Self {
            max_concurrent_requests: settings.max_concurrent_requests,
            retry: settings.retry,
            clock_refresh_interval: settings.clock_refresh_interval,
        }
    }
}

/// Destination of an upload
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub bucket: String,
    pub key: ObjectKey,
    pub acl: CannedAcl,
}

/// Shared refresh clock for all workers of a run
struct ClockRefresher {
    interval: Duration,
    last: Mutex<Instant>,
}

impl ClockRefresher {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(Instant::now()),
        }
    }

    async fn refresh_now<S: StorageClient + ?Sized>(&self, storage: &S) {
        *self.last.lock() = Instant::now();
        if let Err(e) = storage.refresh_clock_skew().await {
            warn!("Client refresh failed (continuing): {}", e);
        }
    }

    /// Refresh if the interval has passed. Only one worker wins the slot.
    async fn refresh_if_due<S: StorageClient + ?Sized>(&self, storage: &S) {
        let due = {
            let mut last = self.last.lock();
            if last.elapsed() >= self.interval {
                *last = Instant::now();
                true
            } else {
                false
            }
        };
        if due {
            debug!("Refresh interval elapsed, rebuilding client");
            if let Err(e) = storage.refresh_clock_skew().await {
                warn!("Client refresh failed (continuing): {}", e);
            }
        }
    }
}

/// Run `call` until it succeeds, fails permanently, or the policy runs out.
///
/// Returns the number of attempts made alongside the last outcome.
async fn with_retries<T, F, Fut>(policy: RetryPolicy, operation: &str, mut call: F) -> (u32, Result<T>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return (attempt, Ok(value)),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts() => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} attempt {}/{} failed: {}; retrying in {:?}",
                    operation,
                    attempt,
                    policy.max_attempts(),
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return (attempt, Err(e)),
        }
    }
}

async fn upload_chunk<S: StorageClient + ?Sized>(
    storage: &S,
    target: &UploadTarget,
    session: &SessionToken,
    chunk: &ChunkDescriptor,
    policy: RetryPolicy,
    clock: &ClockRefresher,
) -> ChunkUploadResult {
    let position = chunk.position;
    let (attempts, outcome) = with_retries(policy, "UploadPart", || async move {
        clock.refresh_if_due(storage).await;
        storage
            .upload_part(&target.bucket, &target.key, session, chunk)
            .await
    })
    .await;

    let outcome = match outcome {
        Ok(token) => {
            debug!(
                "Part {} accepted after {} attempt(s) etag={}",
                position, attempts, token
            );
            Ok(token)
        }
        Err(e) if e.is_retryable() => Err(Error::RetriesExhausted {
            position,
            attempts,
            source: Box::new(e),
        }),
        Err(e) => Err(Error::PartFailed {
            position,
            source: Box::new(e),
        }),
    };

    ChunkUploadResult {
        position,
        attempts,
        outcome,
    }
}

/// Tracks the lifecycle of one run
struct Lifecycle {
    key: ObjectKey,
    state: UploadState,
}

impl Lifecycle {
    fn advance(&mut self, next: UploadState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!("Upload {}: {} -> {}", self.key, self.state, next);
        self.state = next;
    }
}

/// Pick the error a failed run reports: the lowest-position permanent part
/// failure, else the lowest-position exhaustion, else the first error seen.
fn primary_failure(mut failures: Vec<Error>) -> Error {
    failures.sort_by_key(|e| e.position().unwrap_or(u32::MAX));
    let idx = failures
        .iter()
        .position(|e| matches!(e, Error::PartFailed { .. }))
        .or_else(|| {
            failures
                .iter()
                .position(|e| matches!(e, Error::RetriesExhausted { .. }))
        })
        .unwrap_or(0);
    failures.swap_remove(idx)
}

/// Positions must be exactly `1..=N`.
fn validate_chunks(chunks: &[ChunkDescriptor]) -> Result<()> {
    if chunks.is_empty() {
        return Err(Error::Configuration(
            "Nothing to upload: a multipart upload needs at least one part".into(),
        ));
    }

    let mut seen = BTreeSet::new();
    for chunk in chunks {
        if !seen.insert(chunk.position) {
            return Err(Error::Configuration(format!(
                "Duplicate part position {}",
                chunk.position
            )));
        }
    }

    let n = chunks.len() as u32;
    if seen.first() != Some(&1) || seen.last() != Some(&n) {
        return Err(Error::Configuration(format!(
            "Part positions must be 1..={} without gaps",
            n
        )));
    }
    Ok(())
}

/// Drives one multipart upload from initiation to commit or abort
pub struct UploadCoordinator<S: StorageClient + ?Sized> {
    storage: Arc<S>,
    config: CoordinatorConfig,
}

impl<S: StorageClient + ?Sized + 'static> UploadCoordinator<S> {
    pub fn new(storage: Arc<S>, config: CoordinatorConfig) -> Self {
        Self { storage, config }
    }

    /// Upload `chunks` as one object.
    ///
    /// Either every chunk is committed in position order, or the upload
    /// is aborted and an error returned. The caller keeps the chunk files
    /// alive until this returns.
    pub async fn upload(
        &self,
        target: &UploadTarget,
        chunks: &[ChunkDescriptor],
    ) -> Result<CommittedUpload> {
        validate_chunks(chunks)?;

        let mut lifecycle = Lifecycle {
            key: target.key.clone(),
            state: UploadState::Idle,
        };
        let clock = Arc::new(ClockRefresher::new(self.config.clock_refresh_interval));

        clock.refresh_now(&*self.storage).await;
        let storage = &*self.storage;
        let (_, initiated) = with_retries(self.config.retry, "CreateMultipartUpload", || async move {
            storage.initiate(&target.bucket, &target.key, target.acl).await
        })
        .await;
        let token = initiated?;

        let mut session = UploadSession::new(
            target.bucket.clone(),
            target.key.clone(),
            token,
            chunks.iter().map(|c| c.position),
        )?;
        lifecycle.advance(UploadState::Initiated);
        info!(
            "Initiated upload of s3://{}/{} ({} parts, uploadId={})",
            target.bucket,
            target.key,
            chunks.len(),
            session.token
        );

        lifecycle.advance(UploadState::Uploading);
        let results = self.upload_parts(target, &session.token, chunks, &clock).await;

        let mut failures = Vec::new();
        for result in results {
            match result.outcome {
                Ok(token) => {
                    if let Err(e) = session.record(result.position, token) {
                        failures.push(e);
                    }
                }
                Err(e) => {
                    warn!(
                        "Part {} failed after {} attempt(s): {}",
                        result.position, result.attempts, e
                    );
                    failures.push(e);
                }
            }
        }

        if !failures.is_empty() {
            let reason = primary_failure(failures);
            return Err(self.abort(&mut lifecycle, &session, reason).await);
        }

        let parts = match session.completed_parts() {
            Ok(parts) => parts,
            Err(e) => return Err(self.abort(&mut lifecycle, &session, e).await),
        };
        lifecycle.advance(UploadState::AllPartsAcked);

        clock.refresh_now(storage).await;
        let commit_token = &session.token;
        let commit_parts = parts.as_slice();
        let (_, committed) = with_retries(self.config.retry, "CompleteMultipartUpload", || async move {
            storage
                .complete(&target.bucket, &target.key, commit_token, commit_parts)
                .await
        })
        .await;
        if let Err(e) = committed {
            return Err(self.abort(&mut lifecycle, &session, e).await);
        }
        lifecycle.advance(UploadState::Committed);

        let bytes = chunks.iter().map(|c| c.length).sum();
        info!(
            "Committed s3://{}/{} ({} parts, {} bytes)",
            target.bucket,
            target.key,
            parts.len(),
            bytes
        );

        Ok(CommittedUpload {
            bucket: session.bucket,
            key: session.key,
            session: session.token,
            parts: parts.len(),
            bytes,
        })
    }

    /// Fan out one task per chunk and wait for all of them.
    ///
    /// Results come back in ascending position order.
    async fn upload_parts(
        &self,
        target: &UploadTarget,
        session: &SessionToken,
        chunks: &[ChunkDescriptor],
        clock: &Arc<ClockRefresher>,
    ) -> Vec<ChunkUploadResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_requests.max(1)));
        let target = Arc::new(target.clone());

        let mut ordered: Vec<&ChunkDescriptor> = chunks.iter().collect();
        ordered.sort_by_key(|c| c.position);

        let mut handles = Vec::with_capacity(ordered.len());
        for chunk in ordered {
            let storage = Arc::clone(&self.storage);
            let semaphore = Arc::clone(&semaphore);
            let target = Arc::clone(&target);
            let clock = Arc::clone(clock);
            let session = session.clone();
            let chunk = chunk.clone();
            let policy = self.config.retry;
            let position = chunk.position;

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return ChunkUploadResult {
                            position,
                            attempts: 0,
                            outcome: Err(Error::Internal("Upload pool closed".into())),
                        }
                    }
                };
                upload_chunk(&*storage, &target, &session, &chunk, policy, &clock).await
            });
            handles.push((position, handle));
        }

        join_all(handles.into_iter().map(|(position, handle)| async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => ChunkUploadResult {
                    position,
                    attempts: 0,
                    outcome: Err(Error::PartFailed {
                        position,
                        source: Box::new(Error::Internal(format!("Upload task failed: {}", e))),
                    }),
                },
            }
        }))
        .await
    }

    /// Abort the session exactly once and hand back `reason`.
    async fn abort(&self, lifecycle: &mut Lifecycle, session: &UploadSession, reason: Error) -> Error {
        lifecycle.advance(UploadState::Aborting);
        error!(
            "Aborting upload of s3://{}/{} (uploadId={}): {}",
            session.bucket, session.key, session.token, reason
        );

        if let Err(e) = self
            .storage
            .abort(&session.bucket, &session.key, &session.token)
            .await
        {
            warn!(
                "AbortMultipartUpload for uploadId={} failed (ignored): {}",
                session.token, e
            );
        }

        lifecycle.advance(UploadState::Aborted);
        reason
    }
}
