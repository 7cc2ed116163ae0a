//! Upload coordinator: validate a batch, submit it, spawn one tracker per file.
//!
//! ## Flow
//!
//! ```text
//! UploadBatch ─▶ validate ─▶ UploadBackend::submit ─▶ spawn ProgressTracker × N ─▶ RefreshSignal
//!               (all-or-nothing)   (one request)        (appended to TrackedFiles)
//! ```
//!
//! A failed validation or a rejected upload returns synchronously and spawns
//! nothing. Trackers from earlier submissions keep running; new ones are
//! appended, so a user can add statements while others are still converting.

use crate::backend::{HttpBackend, ListingSource, UploadBackend};
use crate::config::UploaderConfig;
use crate::error::{UploadError, ValidationError};
use crate::model::{
    NotSavedFile, PendingFile, SessionId, TrackedFile, UploadBatch, UploadResponse, PDF_MIME,
};
use crate::registry::TrackedFiles;
use crate::signal::RefreshSignal;
use crate::tracker::{ProgressTracker, TrackerContext};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Check a batch against the type and size constraints.
///
/// The first offending file decides the error; nothing is partially accepted.
pub fn validate_batch(batch: &[PendingFile], max_file_bytes: u64) -> Result<(), ValidationError> {
    if batch.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    for file in batch {
        if file.mime_type != PDF_MIME {
            return Err(ValidationError::InvalidType {
                name: file.name.clone(),
                mime_type: file.mime_type.clone(),
            });
        }
        if file.byte_size > max_file_bytes {
            return Err(ValidationError::TooLarge {
                name: file.name.clone(),
                size: file.byte_size,
                limit: max_file_bytes,
            });
        }
    }
    Ok(())
}

/// Split a submitted batch into the files to track and the ones the server
/// declined, in batch order.
///
/// Names are matched as a multiset: one `not_saved_files` entry declines one
/// file of that name, and when `results` is present each entry acknowledges
/// one file. Files missing from `results` are reported as not saved.
fn sort_by_response<'a>(
    batch: &'a [PendingFile],
    response: &UploadResponse,
) -> (Vec<&'a PendingFile>, Vec<NotSavedFile>) {
    let mut declined: HashMap<&str, usize> = HashMap::new();
    for f in &response.not_saved_files {
        *declined.entry(f.file_name.as_str()).or_default() += 1;
    }
    let mut acknowledged: Option<HashMap<&str, usize>> =
        response.results.as_ref().map(|results| {
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for r in results {
                *counts.entry(r.file_name.as_str()).or_default() += 1;
            }
            counts
        });

    let mut tracked = Vec::with_capacity(batch.len());
    let mut not_saved = response.not_saved_files.clone();
    for file in batch {
        let name = file.name.as_str();
        if let Some(n) = declined.get_mut(name).filter(|n| **n > 0) {
            *n -= 1;
            continue;
        }
        if let Some(acks) = acknowledged.as_mut() {
            match acks.get_mut(name).filter(|n| **n > 0) {
                Some(n) => *n -= 1,
                None => {
                    not_saved.push(NotSavedFile {
                        file_name: file.name.clone(),
                        error: Some("not acknowledged by the server".into()),
                    });
                    continue;
                }
            }
        }
        tracked.push(file);
    }
    (tracked, not_saved)
}

/// What a successful submission produced.
#[derive(Debug, Clone)]
pub struct SubmissionReceipt {
    /// Server acknowledgement text, if any.
    pub message: Option<String>,
    /// Initial state of every file now being tracked, in batch order.
    pub accepted: Vec<TrackedFile>,
    /// Files the server declined individually; these are not tracked.
    pub not_saved: Vec<NotSavedFile>,
}

/// Submits batches and owns the trackers they spawn.
pub struct UploadCoordinator {
    config: UploaderConfig,
    backend: Arc<dyn UploadBackend>,
    listing: Arc<dyn ListingSource>,
    signal: Arc<RefreshSignal>,
    tracked: TrackedFiles,
}

impl std::fmt::Debug for UploadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCoordinator")
            .field("config", &self.config)
            .field("backend", &"<dyn UploadBackend>")
            .field("listing", &"<dyn ListingSource>")
            .field("signal", &self.signal)
            .field("tracked", &self.tracked)
            .finish()
    }
}

impl UploadCoordinator {
    /// Coordinator talking HTTP to the configured endpoints.
    pub fn new(config: UploaderConfig) -> Result<Self, UploadError> {
        let http = Arc::new(HttpBackend::new(&config)?);
        Ok(Self::with_backends(config, http.clone(), http))
    }

    /// Coordinator with caller-supplied seams (fakes in tests, proxies, …).
    pub fn with_backends(
        config: UploaderConfig,
        backend: Arc<dyn UploadBackend>,
        listing: Arc<dyn ListingSource>,
    ) -> Self {
        Self {
            config,
            backend,
            listing,
            signal: Arc::new(RefreshSignal::new()),
            tracked: TrackedFiles::new(),
        }
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// The shared refresh signal. Register listeners before submitting.
    pub fn signal(&self) -> &Arc<RefreshSignal> {
        &self.signal
    }

    pub fn tracked(&self) -> &TrackedFiles {
        &self.tracked
    }

    pub fn listing(&self) -> &Arc<dyn ListingSource> {
        &self.listing
    }

    pub fn validate(&self, batch: &[PendingFile]) -> Result<(), ValidationError> {
        validate_batch(batch, self.config.max_file_bytes)
    }

    /// Validate and upload `batch`, then start tracking every accepted file.
    ///
    /// Must be called from within a tokio runtime; trackers are spawned as
    /// tasks and outlive this call.
    ///
    /// # Errors
    /// - [`UploadError::Validation`] — nothing was sent
    /// - [`UploadError::UploadRejected`] / [`UploadError::Transport`] /
    ///   [`UploadError::Timeout`] — sent, but no trackers were spawned
    pub async fn submit(
        &self,
        batch: UploadBatch,
        session: &SessionId,
    ) -> Result<SubmissionReceipt, UploadError> {
        if let Err(e) = self.validate(&batch) {
            warn!("Batch of {} file(s) rejected before upload: {}", batch.len(), e);
            return Err(e.into());
        }

        let response = self.backend.submit(&batch, session).await?;

        let (tracked, not_saved) = sort_by_response(&batch, &response);
        for f in &not_saved {
            warn!(
                "Server did not save '{}': {}",
                f.file_name,
                f.error.as_deref().unwrap_or("no reason given")
            );
        }

        let accepted: Vec<TrackedFile> = tracked
            .into_iter()
            .map(|file| self.spawn_tracker(file, session))
            .collect();

        info!(
            "Submitted {} file(s); tracking {} (total tracked: {})",
            batch.len(),
            accepted.len(),
            self.tracked.len()
        );
        self.signal.notify();

        Ok(SubmissionReceipt {
            message: response.message,
            accepted,
            not_saved,
        })
    }

    /// Convenience: describe each path with [`PendingFile::from_path`], then
    /// [`submit`](Self::submit) them as one batch.
    pub async fn submit_paths<P: AsRef<Path>>(
        &self,
        paths: &[P],
        session: &SessionId,
    ) -> Result<SubmissionReceipt, UploadError> {
        let batch = paths
            .iter()
            .map(|p| PendingFile::from_path(p))
            .collect::<Result<UploadBatch, _>>()?;
        self.submit(batch, session).await
    }

    fn spawn_tracker(&self, file: &PendingFile, session: &SessionId) -> TrackedFile {
        let tracker = ProgressTracker::new(&file.name, file.byte_size, &self.config.timing);
        let initial = tracker.snapshot().clone();
        let (tx, rx) = watch::channel(initial.clone());
        let ctx = TrackerContext {
            session: session.clone(),
            listing: Arc::clone(&self.listing),
            signal: Arc::clone(&self.signal),
            timing: self.config.timing,
        };
        let join = tokio::spawn(tracker.run(ctx, tx));
        self.tracked.push(rx, join);
        initial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PollError;
    use crate::estimate::MEBIBYTE;
    use crate::model::{ListedFile, ListingResponse, Phase, ProcessedFile};
    use crate::tracker::TrackerOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        batches: Mutex<Vec<Vec<String>>>,
        sessions: Mutex<Vec<String>>,
        reject_with: Option<String>,
        not_saved: Vec<NotSavedFile>,
        results: Option<Vec<ProcessedFile>>,
    }

    #[async_trait]
    impl UploadBackend for RecordingBackend {
        async fn submit(
            &self,
            batch: &[PendingFile],
            session: &SessionId,
        ) -> Result<UploadResponse, UploadError> {
            self.batches
                .lock()
                .unwrap()
                .push(batch.iter().map(|f| f.name.clone()).collect());
            self.sessions.lock().unwrap().push(session.to_string());
            if let Some(reason) = &self.reject_with {
                return Err(UploadError::UploadRejected {
                    reason: reason.clone(),
                });
            }
            Ok(UploadResponse {
                message: Some("received".into()),
                not_saved_files: self.not_saved.clone(),
                results: self.results.clone(),
                ..Default::default()
            })
        }
    }

    /// Lists whatever names have been published so far.
    #[derive(Default)]
    struct ManualListing {
        names: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ListingSource for ManualListing {
        async fn list_files(&self, _session: &SessionId) -> Result<ListingResponse, PollError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ListingResponse {
                files: self
                    .names
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|n| ListedFile {
                        name: n.clone(),
                        extra: Default::default(),
                    })
                    .collect(),
            })
        }
    }

    fn pdf(name: &str, size: usize) -> PendingFile {
        PendingFile::in_memory(name, PDF_MIME, vec![0u8; size])
    }

    fn coordinator(
        backend: Arc<RecordingBackend>,
        listing: Arc<ManualListing>,
    ) -> UploadCoordinator {
        UploadCoordinator::with_backends(UploaderConfig::default(), backend, listing)
    }

    #[test]
    fn validate_rejects_wrong_type() {
        let batch = vec![
            pdf("a.pdf", 10),
            PendingFile::in_memory("b.png", "image/png", vec![1, 2, 3]),
        ];
        let err = validate_batch(&batch, 100).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidType {
                name: "b.png".into(),
                mime_type: "image/png".into()
            }
        );
    }

    #[test]
    fn validate_size_limit_is_inclusive() {
        assert!(validate_batch(&[pdf("edge.pdf", 100)], 100).is_ok());
        assert!(matches!(
            validate_batch(&[pdf("over.pdf", 101)], 100),
            Err(ValidationError::TooLarge { size: 101, .. })
        ));
    }

    #[test]
    fn validate_empty_batch() {
        assert_eq!(validate_batch(&[], 100), Err(ValidationError::EmptyBatch));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_file_blocks_whole_batch() {
        let backend = Arc::new(RecordingBackend::default());
        let listing = Arc::new(ManualListing::default());
        let coord = coordinator(backend.clone(), listing);

        let mut big = pdf("big.pdf", 1);
        big.byte_size = 50 * MEBIBYTE + 1;
        let err = coord
            .submit(vec![pdf("ok.pdf", 10), big], &SessionId::new("s"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::Validation(ValidationError::TooLarge { .. })
        ));
        assert!(backend.batches.lock().unwrap().is_empty());
        assert!(coord.tracked().is_empty());
        assert_eq!(coord.signal().fired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn two_valid_pdfs_get_two_trackers() {
        let backend = Arc::new(RecordingBackend::default());
        let listing = Arc::new(ManualListing::default());
        let coord = coordinator(backend.clone(), listing);

        let mut five = pdf("five.pdf", 1);
        five.byte_size = 5 * MEBIBYTE;
        let receipt = coord
            .submit(
                vec![pdf("one.pdf", MEBIBYTE as usize), five],
                &SessionId::new("abc"),
            )
            .await
            .unwrap();

        let estimates: Vec<u64> = receipt.accepted.iter().map(|f| f.estimated_seconds).collect();
        assert_eq!(estimates, vec![30, 90]);
        assert_eq!(coord.tracked().len(), 2);
        assert!(coord
            .tracked()
            .snapshot()
            .iter()
            .all(|f| f.phase == Phase::Animating));
        assert_eq!(*backend.sessions.lock().unwrap(), vec!["abc".to_string()]);
        assert_eq!(coord.signal().fired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn later_submissions_append() {
        let backend = Arc::new(RecordingBackend::default());
        let listing = Arc::new(ManualListing::default());
        let coord = coordinator(backend.clone(), listing);
        let session = SessionId::new("s");

        coord.submit(vec![pdf("a.pdf", 10)], &session).await.unwrap();
        coord
            .submit(vec![pdf("b.pdf", 10), pdf("c.pdf", 10)], &session)
            .await
            .unwrap();

        let names: Vec<String> = coord
            .tracked()
            .snapshot()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf", "c.pdf"]);
        assert_eq!(backend.batches.lock().unwrap().len(), 2);
        assert_eq!(coord.signal().fired(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_upload_spawns_nothing() {
        let backend = Arc::new(RecordingBackend {
            reject_with: Some("X-Session-Id header is missing".into()),
            ..Default::default()
        });
        let listing = Arc::new(ManualListing::default());
        let coord = coordinator(backend, listing);

        let err = coord
            .submit(vec![pdf("a.pdf", 10)], &SessionId::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UploadRejected { .. }));
        assert!(coord.tracked().is_empty());
        assert_eq!(coord.signal().fired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn declined_files_are_not_tracked() {
        let backend = Arc::new(RecordingBackend {
            not_saved: vec![NotSavedFile {
                file_name: "bad.pdf".into(),
                error: Some("file size exceeds limit".into()),
            }],
            ..Default::default()
        });
        let listing = Arc::new(ManualListing::default());
        let coord = coordinator(backend, listing);

        let receipt = coord
            .submit(vec![pdf("good.pdf", 10), pdf("bad.pdf", 10)], &SessionId::new("s"))
            .await
            .unwrap();
        assert_eq!(receipt.accepted.len(), 1);
        assert_eq!(receipt.accepted[0].name, "good.pdf");
        assert_eq!(receipt.not_saved.len(), 1);
        assert_eq!(coord.tracked().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn trackers_complete_independently() {
        let backend = Arc::new(RecordingBackend::default());
        let listing = Arc::new(ManualListing::default());
        let coord = coordinator(backend, listing.clone());

        let mut five = pdf("five.pdf", 1);
        five.byte_size = 5 * MEBIBYTE;
        coord
            .submit(vec![pdf("one.pdf", 10), five], &SessionId::new("s"))
            .await
            .unwrap();

        // Both artifacts are already there by the time anyone polls.
        listing
            .names
            .lock()
            .unwrap()
            .extend(["one.csv".to_string(), "five.csv".to_string()]);

        let outcomes = coord.tracked().wait_all().await.unwrap();
        assert!(outcomes.iter().all(|(_, o)| o.is_completed()));
        assert_eq!(outcomes[0].1, TrackerOutcome::Completed { polls: 1 });
        assert!(coord
            .tracked()
            .snapshot()
            .iter()
            .all(|f| f.phase == Phase::Complete && f.progress_percent == 100.0));
        // One for the submission, one per completed file.
        assert_eq!(coord.signal().fired(), 3);
        assert_eq!(listing.calls.load(Ordering::SeqCst), 2);
    }

    fn processed(name: &str) -> ProcessedFile {
        ProcessedFile {
            file_name: name.into(),
            node_count: None,
            total_length: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_names_decline_one_each() {
        let backend = Arc::new(RecordingBackend {
            not_saved: vec![NotSavedFile {
                file_name: "stmt.pdf".into(),
                error: None,
            }],
            ..Default::default()
        });
        let listing = Arc::new(ManualListing::default());
        let coord = coordinator(backend, listing);

        let receipt = coord
            .submit(vec![pdf("stmt.pdf", 10), pdf("stmt.pdf", 20)], &SessionId::new("s"))
            .await
            .unwrap();
        assert_eq!(receipt.accepted.len(), 1);
        assert_eq!(receipt.not_saved.len(), 1);
        assert_eq!(coord.tracked().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn only_acknowledged_files_are_tracked() {
        let backend = Arc::new(RecordingBackend {
            results: Some(vec![processed("march.pdf")]),
            ..Default::default()
        });
        let listing = Arc::new(ManualListing::default());
        let coord = coordinator(backend, listing);

        let receipt = coord
            .submit(
                vec![pdf("march.pdf", 10), pdf("corrupt.pdf", 10)],
                &SessionId::new("s"),
            )
            .await
            .unwrap();
        let names: Vec<&str> = receipt.accepted.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["march.pdf"]);
        assert_eq!(receipt.not_saved[0].file_name, "corrupt.pdf");
        assert_eq!(coord.tracked().len(), 1);
    }

    #[test]
    fn response_without_detail_tracks_everything() {
        let batch = vec![pdf("a.pdf", 1), pdf("b.pdf", 1)];
        let (tracked, not_saved) = sort_by_response(&batch, &UploadResponse::default());
        assert_eq!(tracked.len(), 2);
        assert!(not_saved.is_empty());
    }
}
