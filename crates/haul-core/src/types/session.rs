//! Multipart upload session types

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Destination object key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upload ID assigned by the service on initiation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-part ETag returned by the service. Passed back verbatim on commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompletionToken(String);

impl CompletionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CompletionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entry of the commit request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub position: u32,
    pub token: CompletionToken,
}

/// Lifecycle of one upload attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadState {
    Idle,
    Initiated,
    Uploading,
    AllPartsAcked,
    Committed,
    Aborting,
    Aborted,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Committed | UploadState::Aborted)
    }

    pub fn can_transition_to(&self, next: UploadState) -> bool {
        use UploadState::*;
        match (self, next) {
            (Idle, Initiated)
            | (Initiated, Uploading)
            | (Uploading, AllPartsAcked)
            | (AllPartsAcked, Committed)
            | (Aborting, Aborted) => true,
            (current, Aborting) => !current.is_terminal() && *current != Aborting,
            _ => false,
        }
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UploadState::Idle => "idle",
            UploadState::Initiated => "initiated",
            UploadState::Uploading => "uploading",
            UploadState::AllPartsAcked => "all-parts-acked",
            UploadState::Committed => "committed",
            UploadState::Aborting => "aborting",
            UploadState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Outcome of uploading one chunk, after any retries
#[derive(Debug)]
pub struct ChunkUploadResult {
    pub position: u32,
    pub attempts: u32,
    pub outcome: Result<CompletionToken>,
}

/// An open multipart upload and the completion tokens collected so far.
///
/// Tokens are keyed by position; commit order is derived from the keys,
/// never from the order in which tokens were recorded.
#[derive(Debug)]
pub struct UploadSession {
    pub bucket: String,
    pub key: ObjectKey,
    pub token: SessionToken,
    expected: BTreeSet<u32>,
    completed: BTreeMap<u32, CompletionToken>,
}

impl UploadSession {
    pub fn new(
        bucket: impl Into<String>,
        key: ObjectKey,
        token: SessionToken,
        positions: impl IntoIterator<Item = u32>,
    ) -> Result<Self> {
        let mut expected = BTreeSet::new();
        for position in positions {
            if !expected.insert(position) {
                return Err(Error::Configuration(format!(
                    "Duplicate chunk position {}",
                    position
                )));
            }
        }

        Ok(Self {
            bucket: bucket.into(),
            key,
            token,
            expected,
            completed: BTreeMap::new(),
        })
    }

    /// Record the completion token of a part. Each position is written once.
    pub fn record(&mut self, position: u32, token: CompletionToken) -> Result<()> {
        if !self.expected.contains(&position) {
            return Err(Error::Configuration(format!(
                "Unexpected chunk position {} for upload {}",
                position, self.token
            )));
        }
        if self.completed.contains_key(&position) {
            return Err(Error::Configuration(format!(
                "Chunk position {} recorded twice for upload {}",
                position, self.token
            )));
        }
        self.completed.insert(position, token);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.completed.len() == self.expected.len()
    }

    /// Expected positions without a recorded token, ascending
    pub fn missing(&self) -> Vec<u32> {
        self.expected
            .iter()
            .filter(|p| !self.completed.contains_key(p))
            .copied()
            .collect()
    }

    /// Parts for the commit request, in ascending position order.
    pub fn completed_parts(&self) -> Result<Vec<CompletedPart>> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(Error::Internal(format!(
                "Cannot commit upload {}: missing parts {:?}",
                self.token, missing
            )));
        }

        Ok(self
            .completed
            .iter()
            .map(|(position, token)| CompletedPart {
                position: *position,
                token: token.clone(),
            })
            .collect())
    }
}

/// Result of a committed multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedUpload {
    pub bucket: String,
    pub key: ObjectKey,
    pub session: SessionToken,
    pub parts: usize,
    pub bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(positions: &[u32]) -> UploadSession {
        UploadSession::new(
            "backups",
            ObjectKey::new("db.dump"),
            SessionToken::new("upload-1"),
            positions.iter().copied(),
        )
        .unwrap()
    }

    #[test]
    fn test_completed_parts_sorted_by_position() {
        let mut s = session(&[1, 2, 3]);
        s.record(3, CompletionToken::new("\"c\"")).unwrap();
        s.record(1, CompletionToken::new("\"a\"")).unwrap();
        s.record(2, CompletionToken::new("\"b\"")).unwrap();

        let parts = s.completed_parts().unwrap();
        let positions: Vec<u32> = parts.iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert_eq!(parts[0].token.as_str(), "\"a\"");
    }

    #[test]
    fn test_record_rejects_duplicates_and_strangers() {
        let mut s = session(&[1, 2]);
        s.record(1, CompletionToken::new("a")).unwrap();
        assert!(matches!(
            s.record(1, CompletionToken::new("a2")),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            s.record(7, CompletionToken::new("x")),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_incomplete_session_cannot_commit() {
        let mut s = session(&[1, 2, 3]);
        s.record(2, CompletionToken::new("b")).unwrap();
        assert!(!s.is_complete());
        assert_eq!(s.missing(), vec![1, 3]);
        assert!(s.completed_parts().is_err());
    }

    #[test]
    fn test_duplicate_expected_positions_rejected() {
        let result = UploadSession::new(
            "b",
            ObjectKey::new("k"),
            SessionToken::new("u"),
            [1, 2, 2],
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_state_transitions() {
        use UploadState::*;
        assert!(Idle.can_transition_to(Initiated));
        assert!(Uploading.can_transition_to(AllPartsAcked));
        assert!(AllPartsAcked.can_transition_to(Committed));
        assert!(Uploading.can_transition_to(Aborting));
        assert!(AllPartsAcked.can_transition_to(Aborting));
        assert!(Aborting.can_transition_to(Aborted));

        assert!(!Idle.can_transition_to(Committed));
        assert!(!Committed.can_transition_to(Aborting));
        assert!(!Aborted.can_transition_to(Aborting));
        assert!(!Aborting.can_transition_to(Aborting));
        assert!(Committed.is_terminal() && Aborted.is_terminal());
    }
}
