//! The two network seams the core talks through.
//!
//! ## Data Flow
//!
//! ```text
//! coordinator ──▶ UploadBackend::submit   (one multipart POST per batch)
//! tracker     ──▶ ListingSource::list_files (GET every poll interval)
//! ```
//!
//! Both are object-safe async traits so tests can swap in scripted fakes and
//! drive the trackers on a paused tokio clock. [`http::HttpBackend`]
//! implements both against the real endpoints.

pub mod http;

use crate::error::{PollError, UploadError};
use crate::model::{ListingResponse, PendingFile, SessionId, UploadResponse};
use async_trait::async_trait;

pub use http::HttpBackend;

/// Accepts a whole batch in one request.
#[async_trait]
pub trait UploadBackend: Send + Sync {
    /// Send every file in `batch`, tagged with `session`.
    ///
    /// A non-success status or an undecodable body is
    /// [`UploadError::UploadRejected`].
    async fn submit(
        &self,
        batch: &[PendingFile],
        session: &SessionId,
    ) -> Result<UploadResponse, UploadError>;
}

/// Lists the converted files visible to a session.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn list_files(&self, session: &SessionId) -> Result<ListingResponse, PollError>;
}
