//! # stmt2csv
//!
//! Submit PDF bank statements for server-side CSV conversion and track each
//! file's progress until its CSV appears.
//!
//! ## Why simulate progress?
//!
//! The conversion backend works out-of-band: the upload request returns as
//! soon as the files are saved, and the only evidence of completion is a
//! `.csv` showing up in the session's file listing. There is no progress
//! channel. Each file therefore gets a tracker that animates an estimate
//! derived from its size, stalls just short of the end, and then polls the
//! listing until the real artifact is there.
//!
//! ## Flow Overview
//!
//! ```text
//! PDFs
//!  │
//!  ├─ 1. Validate  all-or-nothing: application/pdf, ≤ 50 MiB
//!  ├─ 2. Submit    one multipart POST, tagged with the session id
//!  ├─ 3. Track     one ProgressTracker task per accepted file
//!  │                 Animating ─▶ AwaitingConfirmation ─▶ Complete
//!  └─ 4. Refresh   RefreshSignal fires per submission and per completion
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stmt2csv::{Endpoints, SessionId, UploadCoordinator, UploaderConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = UploaderConfig::builder()
//!         .endpoints(Endpoints::for_base("https://statements.example.com"))
//!         .build()?;
//!     let coordinator = UploadCoordinator::new(config)?;
//!
//!     let session = SessionId::new("3f0c9a");
//!     coordinator.submit_paths(&["march.pdf", "april.pdf"], &session).await?;
//!
//!     for (name, outcome) in coordinator.tracked().wait_all().await? {
//!         eprintln!("{name}: {outcome:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `stmt2csv` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod estimate;
pub mod model;
pub mod registry;
pub mod signal;
pub mod tracker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{HttpBackend, ListingSource, UploadBackend};
pub use config::{Endpoints, PollLimit, TrackerTiming, UploaderConfig, UploaderConfigBuilder};
pub use coordinator::{validate_batch, SubmissionReceipt, UploadCoordinator};
pub use error::{PollError, UploadError, ValidationError};
pub use estimate::estimated_seconds;
pub use model::{
    FileContent, ListedFile, ListingResponse, NotSavedFile, PendingFile, Phase, ProcessedFile,
    SavedFile, SessionId, TrackedFile, UploadBatch, UploadResponse, PDF_MIME,
};
pub use registry::TrackedFiles;
pub use signal::{NoopRefreshListener, RefreshListener, RefreshSignal, RefreshSubscription};
pub use tracker::{artifact_name, ProgressTracker, TrackerContext, TrackerOutcome};
