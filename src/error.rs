//! Error types for the stmt2csv library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`UploadError`] — **Fatal** for one submission: the batch failed
//!   validation, the upload endpoint refused it, or the request never got a
//!   usable answer. Returned as `Err(UploadError)` from
//!   [`crate::coordinator::UploadCoordinator::submit`]; no trackers are
//!   spawned.
//!
//! * [`PollError`] — **Non-fatal**: a single listing poll failed (network
//!   blip, 5xx, garbled body). Trackers log it and poll again on the next
//!   interval; it never escapes a tracker.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the stmt2csv library.
///
/// Poll-level failures use [`PollError`] and are absorbed by the tracker
/// rather than propagated here.
#[derive(Debug, Error)]
pub enum UploadError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Reading the file contents for the multipart body failed.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Validation errors ─────────────────────────────────────────────────
    /// The batch was rejected before anything was sent.
    #[error("Batch rejected: {0}")]
    Validation(#[from] ValidationError),

    // ── Submission errors ─────────────────────────────────────────────────
    /// The upload endpoint answered with a non-success status or an
    /// unparseable body.
    #[error("Upload rejected: {reason}")]
    UploadRejected { reason: String },

    /// The upload request never produced a response.
    #[error("Upload to '{url}' failed: {reason}\nCheck the backend is running.")]
    Transport { url: String, reason: String },

    /// The upload request exceeded the configured timeout.
    #[error("Upload timed out after {secs}s for '{url}'\nIncrease --timeout.")]
    Timeout { url: String, secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a batch failed client-side validation.
///
/// Validation is all-or-nothing, so one value describes the whole batch: the
/// first offending file wins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The file is not a PDF.
    #[error("'{name}' is not a PDF (type '{mime_type}'); only application/pdf is supported")]
    InvalidType { name: String, mime_type: String },

    /// The file exceeds the size limit.
    #[error("'{name}' is {size} bytes; the limit is {limit} bytes")]
    TooLarge { name: String, size: u64, limit: u64 },

    /// Nothing to submit.
    #[error("no files selected")]
    EmptyBatch,
}

/// A non-fatal error for a single listing poll.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PollError {
    /// The request failed before a response arrived.
    #[error("listing request failed: {detail}")]
    Transport { detail: String },

    /// The listing endpoint answered with a non-success status.
    #[error("listing endpoint returned HTTP {status}")]
    Status { status: u16 },

    /// The body was not a `{ "files": [...] }` object.
    #[error("listing response could not be decoded: {detail}")]
    Malformed { detail: String },
}
