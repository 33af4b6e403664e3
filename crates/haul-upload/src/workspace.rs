//! Scoped staging directories
//!
//! Each run gets a private directory holding one file per chunk. The
//! [`Workspace`] handle owns that directory and removes it when released
//! or dropped.

use haul_core::types::{ChunkDescriptor, ChunkRange};
use haul_core::{Error, Result};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{checksum, chunker};

/// Creates per-run workspaces under a root directory
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Split `source` into `chunk_size` slices and stage each one.
    ///
    /// Blocking; see [`WorkspaceManager::stage_async`]. If staging fails
    /// part-way the directory is removed before the error is returned.
    pub fn stage(&self, source: &Path, chunk_size: u64) -> Result<Workspace> {
        let ranges = chunker::split(source, chunk_size)?;
        let input = File::open(source)?;
        self.stage_from(source, input, ranges)
    }

    fn stage_from<R: Read + Seek>(
        &self,
        source: &Path,
        mut input: R,
        ranges: Vec<ChunkRange>,
    ) -> Result<Workspace> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source".to_string());
        let dir = self.root.join(format!("{}.{}", name, Uuid::new_v4().simple()));

        fs::create_dir_all(&self.root)?;
        fs::create_dir(&dir)?;

        // From here on the handle owns the directory.
        let mut workspace = Workspace {
            dir,
            chunks: Vec::with_capacity(ranges.len()),
            released: false,
        };

        for range in ranges {
            let path = workspace.dir.join(format!("part-{:05}", range.position));

            input.seek(SeekFrom::Start(range.offset))?;
            let mut out = BufWriter::new(File::create(&path)?);
            let copied = io::copy(&mut (&mut input).take(range.length), &mut out)?;
            out.flush()?;

            if copied != range.length {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "{} shrank while staging part {} ({} of {} bytes)",
                        source.display(),
                        range.position,
                        copied,
                        range.length
                    ),
                )));
            }

            let checksum = checksum::digest_file(&path)?;
            debug!(
                "Staged part {} offset={} size={} md5={}",
                range.position, range.offset, range.length, checksum
            );
            workspace
                .chunks
                .push(ChunkDescriptor::new(range, path, checksum));
        }

        info!(
            "Staged {} in {} part(s) under {}",
            source.display(),
            workspace.chunks.len(),
            workspace.dir.display()
        );
        Ok(workspace)
    }

    /// [`WorkspaceManager::stage`] on the blocking pool
    pub async fn stage_async(&self, source: PathBuf, chunk_size: u64) -> Result<Workspace> {
        let manager = self.clone();
        tokio::task::spawn_blocking(move || manager.stage(&source, chunk_size))
            .await
            .map_err(|e| Error::Internal(format!("Staging task failed: {}", e)))?
    }
}

/// A staged source file. Removes its directory on release or drop.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    chunks: Vec<ChunkDescriptor>,
    released: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Staged chunks in ascending position order
    pub fn chunks(&self) -> &[ChunkDescriptor] {
        &self.chunks
    }

    pub fn total_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.length).sum()
    }

    /// Remove the directory and everything in it.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                debug!("Removed workspace {}", self.dir.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove workspace {}: {}", self.dir.display(), e);
            }
        }
    }
}
