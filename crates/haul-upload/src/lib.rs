//! Multipart upload orchestration
//!
//! A source file is split into ordered chunks, each chunk is staged to a
//! private workspace and checksummed, and the chunks are uploaded
//! concurrently. The commit lists completion tokens in ascending part
//! order no matter which worker finished first; any unrecoverable part
//! failure aborts the upload instead.

pub mod checksum;
pub mod chunker;
pub mod coordinator;
pub mod uploader;
pub mod workspace;

pub use coordinator::{CoordinatorConfig, UploadCoordinator, UploadTarget};
pub use uploader::{upload, UploadReport, Uploader};
pub use workspace::{Workspace, WorkspaceManager};
