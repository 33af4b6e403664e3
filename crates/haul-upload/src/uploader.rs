//! End-to-end upload of one source file

use haul_core::types::{CommittedUpload, ObjectKey};
use haul_core::utils::object_key_for;
use haul_core::{Error, Result, UploadConfig, UploadSettings};
use haul_storage::{S3Storage, StorageClient};
use humansize::{format_size, BINARY};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::coordinator::{CoordinatorConfig, UploadCoordinator, UploadTarget};
use crate::workspace::WorkspaceManager;

/// Outcome of a run. The upload result and the workspace cleanup result
/// are kept apart so neither hides the other.
#[derive(Debug)]
pub struct UploadReport {
    pub result: Result<CommittedUpload>,
    pub cleanup: Result<()>,
}

impl UploadReport {
    fn early(err: Error) -> Self {
        Self {
            result: Err(err),
            cleanup: Ok(()),
        }
    }

    /// The upload result. A cleanup failure is logged, not returned.
    pub fn into_result(self) -> Result<CommittedUpload> {
        if let Err(e) = &self.cleanup {
            warn!("Workspace cleanup failed: {}", e);
        }
        self.result
    }
}

/// Stages, uploads and cleans up source files against one storage client
pub struct Uploader<S: StorageClient + ?Sized> {
    storage: Arc<S>,
    settings: UploadSettings,
}

impl<S: StorageClient + ?Sized + 'static> Uploader<S> {
    pub fn new(storage: Arc<S>, settings: UploadSettings) -> Self {
        Self { storage, settings }
    }

    /// Upload `source` and report both the outcome and the cleanup.
    pub async fn run(&self, source: &Path) -> UploadReport {
        let key = match object_key_for(source, self.settings.key_prefix.as_deref()) {
            Ok(key) => key,
            Err(e) => return UploadReport::early(e),
        };

        let metadata = match tokio::fs::metadata(source).await {
            Ok(m) => m,
            Err(e) => return UploadReport::early(e.into()),
        };
        if !metadata.is_file() {
            return UploadReport::early(Error::Configuration(format!(
                "{} is not a regular file",
                source.display()
            )));
        }
        if metadata.len() == 0 {
            return UploadReport::early(Error::Configuration(format!(
                "{} is empty; refusing to start a multipart upload with no parts",
                source.display()
            )));
        }

        info!(
            "Uploading {} ({}) to s3://{}/{}",
            source.display(),
            format_size(metadata.len(), BINARY),
            self.settings.bucket,
            key
        );

        let manager = WorkspaceManager::new(&self.settings.workspace_dir);
        let workspace = match manager
            .stage_async(source.to_path_buf(), self.settings.chunk_size)
            .await
        {
            Ok(w) => w,
            Err(e) => return UploadReport::early(e),
        };

        let target = UploadTarget {
            bucket: self.settings.bucket.clone(),
            key,
            acl: self.settings.acl,
        };
        let coordinator = UploadCoordinator::new(
            Arc::clone(&self.storage),
            CoordinatorConfig::from(&self.settings),
        );
        let result = coordinator.upload(&target, workspace.chunks()).await;
        let cleanup = workspace.release().await;

        UploadReport { result, cleanup }
    }

    /// Upload `source` and return the key of the stored object.
    pub async fn upload(&self, source: &Path) -> Result<ObjectKey> {
        let committed = self.run(source).await.into_result()?;
        Ok(committed.key)
    }
}

impl Uploader<S3Storage> {
    /// Resolve `config` and build an uploader backed by S3.
    pub fn from_config(config: &UploadConfig) -> Result<Self> {
        let settings = config.resolve()?;
        let storage = Arc::new(S3Storage::new(&settings));
        Ok(Self::new(storage, settings))
    }
}

/// Upload `source` to the S3 bucket described by `config`.
pub async fn upload(source: &Path, config: &UploadConfig) -> Result<ObjectKey> {
    Uploader::from_config(config)?.upload(source).await
}
