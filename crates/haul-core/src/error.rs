//! Error types for haul

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration Errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    // Local Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Storage Errors
    #[error("Transient storage error during {operation}: {message}")]
    Transient { operation: String, message: String },

    #[error("Storage rejected {operation}: {message}")]
    Permanent { operation: String, message: String },

    #[error("Checksum mismatch on part {position}: {message}")]
    ChecksumMismatch { position: u32, message: String },

    // Upload Errors
    #[error("Part {position} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        position: u32,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Part {position} failed: {source}")]
    PartFailed {
        position: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Permanent {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Only transient storage failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient { .. })
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "ConfigurationError",
            Error::Io(_) => "IOError",
            Error::Transient { .. } => "TransientError",
            Error::Permanent { .. } => "PermanentError",
            Error::ChecksumMismatch { .. } => "ChecksumMismatchError",
            Error::RetriesExhausted { .. } => "RetriesExhausted",
            Error::PartFailed { source, .. } => source.code(),
            Error::Internal(_) => "InternalError",
        }
    }

    /// Part position this error is attributed to, if any.
    pub fn position(&self) -> Option<u32> {
        match self {
            Error::ChecksumMismatch { position, .. }
            | Error::RetriesExhausted { position, .. }
            | Error::PartFailed { position, .. } => Some(*position),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(Error::transient("UploadPart", "timeout").is_retryable());
        assert!(!Error::permanent("UploadPart", "AccessDenied").is_retryable());
        assert!(!Error::ChecksumMismatch {
            position: 1,
            message: "BadDigest".into()
        }
        .is_retryable());
        assert!(!Error::Configuration("missing bucket".into()).is_retryable());
    }

    #[test]
    fn test_part_failed_reports_inner_code() {
        let err = Error::PartFailed {
            position: 2,
            source: Box::new(Error::permanent("UploadPart", "AccessDenied")),
        };
        assert_eq!(err.code(), "PermanentError");
        assert_eq!(err.position(), Some(2));
        assert!(err.to_string().contains("Part 2"));
    }

    #[test]
    fn test_retries_exhausted_display() {
        let err = Error::RetriesExhausted {
            position: 3,
            attempts: 4,
            source: Box::new(Error::transient("UploadPart", "connection reset")),
        };
        assert_eq!(err.code(), "RetriesExhausted");
        assert!(err.to_string().contains("4 attempt(s)"));
    }
}
