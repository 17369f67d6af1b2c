//! Error types for the synchronization pass.
//!
//! The cache itself is infallible; only talking to the remote service can
//! fail, and those failures are reported per item so that one bad message
//! does not discard the rest of a batch.

use thiserror::Error;

/// Failure reported by a [`crate::Downloader`].
#[derive(Debug, Error)]
#[error("{0}")]
pub struct DownloadError(pub String);

impl DownloadError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// One or more items could not be fetched; everything else was cached.
    #[error("Failed to download {} item(s), first: {}", .failed.len(), first_failure(.failed))]
    Download { failed: Vec<(String, DownloadError)> },

    #[error("Invalid sync configuration: {0}")]
    InvalidConfiguration(String),
}

fn first_failure(failed: &[(String, DownloadError)]) -> String {
    failed
        .first()
        .map(|(id, err)| format!("{id}: {err}"))
        .unwrap_or_default()
}

/// Specialized `Result` type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
