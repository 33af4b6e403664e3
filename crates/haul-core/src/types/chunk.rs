//! Chunk types produced by splitting and staging a source file

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Base64-encoded MD5 digest, sent as the `Content-MD5` header of a part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One contiguous byte range of the source file.
///
/// Positions are 1-based and dense; position order matches offset order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub position: u32,
    pub offset: u64,
    pub length: u64,
}

impl ChunkRange {
    /// Offset one past the last byte of this range
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// A staged, checksummed chunk ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub position: u32,
    pub offset: u64,
    pub length: u64,
    /// Backing file holding exactly this chunk's bytes
    pub path: PathBuf,
    pub checksum: Checksum,
}

impl ChunkDescriptor {
    pub fn new(range: ChunkRange, path: PathBuf, checksum: Checksum) -> Self {
        Self {
            position: range.position,
            offset: range.offset,
            length: range.length,
            path,
            checksum,
        }
    }
}
