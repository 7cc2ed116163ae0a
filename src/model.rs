//! Data model shared by the coordinator, the trackers and the rendering layer.
//!
//! [`PendingFile`] and [`UploadBatch`] exist only while a submission is being
//! validated and sent. A [`TrackedFile`] is created per accepted file and is
//! written by exactly one tracker for the rest of the coordinator's life.
//! The `*Response` types mirror the JSON bodies of the two endpoints.

use crate::error::UploadError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The only MIME type the coordinator accepts.
pub const PDF_MIME: &str = "application/pdf";

/// MIME type reported for files whose magic bytes are not `%PDF`.
pub const OCTET_STREAM_MIME: &str = "application/octet-stream";

/// Opaque correlation key scoping uploads and listings to one visit.
///
/// Passed explicitly to the coordinator and every tracker. An absent id is
/// represented by the empty string, which is what the upload header carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id used when no session has been established.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where the bytes of a [`PendingFile`] come from.
#[derive(Debug, Clone)]
pub enum FileContent {
    /// Read lazily from disk when the multipart body is built.
    Disk(PathBuf),
    /// Already in memory.
    Memory(Vec<u8>),
}

/// One file the user selected for upload.
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub name: String,
    pub byte_size: u64,
    pub mime_type: String,
    pub content: FileContent,
}

/// The files submitted in one user action, in selection order.
pub type UploadBatch = Vec<PendingFile>;

impl PendingFile {
    /// Build a file from an in-memory buffer. `byte_size` is the buffer length.
    pub fn in_memory(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            byte_size: bytes.len() as u64,
            mime_type: mime_type.into(),
            content: FileContent::Memory(bytes),
        }
    }

    /// Describe a file on disk without reading it fully.
    ///
    /// The size comes from file metadata; the MIME type is sniffed from the
    /// first four bytes (`%PDF`), so a renamed text file still fails
    /// validation as [`crate::error::ValidationError::InvalidType`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, UploadError> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(UploadError::FileNotFound { path });
        }

        let mut file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(UploadError::PermissionDenied { path });
            }
            Err(_) => return Err(UploadError::FileNotFound { path }),
        };

        let byte_size = file
            .metadata()
            .map_err(|e| UploadError::ReadFailed {
                path: path.clone(),
                source: e,
            })?
            .len();

        let mut magic = [0u8; 4];
        let mime_type = if file.read_exact(&mut magic).is_ok() && &magic == b"%PDF" {
            PDF_MIME
        } else {
            OCTET_STREAM_MIME
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::FileNotFound { path: path.clone() })?;

        debug!("Pending file {} ({} bytes, {})", name, byte_size, mime_type);
        Ok(Self {
            name,
            byte_size,
            mime_type: mime_type.to_string(),
            content: FileContent::Disk(path),
        })
    }

    /// Load the full contents for the multipart body.
    pub async fn read_contents(&self) -> Result<Vec<u8>, UploadError> {
        match &self.content {
            FileContent::Memory(bytes) => Ok(bytes.clone()),
            FileContent::Disk(path) => {
                tokio::fs::read(path)
                    .await
                    .map_err(|e| UploadError::ReadFailed {
                        path: path.clone(),
                        source: e,
                    })
            }
        }
    }
}

/// Lifecycle of a tracked file. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    /// Percentage advances on every tick without external confirmation.
    Animating,
    /// Percentage frozen; the listing endpoint is polled for the artifact.
    AwaitingConfirmation,
    /// The artifact was observed. Terminal.
    Complete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Animating => "converting",
            Phase::AwaitingConfirmation => "finishing",
            Phase::Complete => "done",
        };
        f.write_str(s)
    }
}

/// Read-only view of one file's progress, as published by its tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedFile {
    pub name: String,
    pub byte_size: u64,
    /// Estimated conversion time in ticks (seconds at the default cadence).
    pub estimated_seconds: u64,
    /// In `[0, 100]`, non-decreasing.
    pub progress_percent: f64,
    pub phase: Phase,
}

// ── Wire types ───────────────────────────────────────────────────────────

/// Body of a successful upload response.
///
/// Every field is optional. The production backend answers `202` with
/// `message` and `results`, one entry per file it saved and parsed; files it
/// skipped are simply absent from `results`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub message: Option<String>,
    /// `None` when the server gave no per-file acknowledgement.
    #[serde(default)]
    pub results: Option<Vec<ProcessedFile>>,
    #[serde(default)]
    pub saved_files: Vec<SavedFile>,
    #[serde(default)]
    pub not_saved_files: Vec<NotSavedFile>,
}

/// A file the backend saved, parsed and queued for conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedFile {
    pub file_name: String,
    #[serde(default)]
    pub node_count: Option<u64>,
    #[serde(default)]
    pub total_length: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedFile {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotSavedFile {
    pub file_name: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of a listing response: `{ "files": [{ "name": ..., ... }] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingResponse {
    pub files: Vec<ListedFile>,
}

/// One entry of a listing. Only `name` matters to the trackers; the rest is
/// kept for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListedFile {
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ListingResponse {
    pub fn contains(&self, name: &str) -> bool {
        self.files.iter().any(|f| f.name == name)
    }
}
