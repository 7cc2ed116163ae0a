//! Append-only registry of the files a coordinator is tracking.
//!
//! Each entry pairs the read side of a tracker's `watch` channel with the
//! tracker task's join handle. The tracker is the only writer of its
//! [`TrackedFile`]; everything here only reads. Entries are never removed,
//! so indices stay stable across submissions for a rendering layer that
//! draws one row per file.

use crate::error::UploadError;
use crate::model::TrackedFile;
use crate::tracker::TrackerOutcome;
use futures::future::join_all;
use std::sync::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

struct Entry {
    rx: watch::Receiver<TrackedFile>,
    join: Option<JoinHandle<TrackerOutcome>>,
    outcome: Option<TrackerOutcome>,
}

/// All files tracked so far, in submission order.
#[derive(Default)]
pub struct TrackedFiles {
    entries: Mutex<Vec<Entry>>,
}

impl std::fmt::Debug for TrackedFiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.snapshot()).finish()
    }
}

impl TrackedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, rx: watch::Receiver<TrackedFile>, join: JoinHandle<TrackerOutcome>) {
        let mut entries = self.lock();
        debug!("Tracking #{}: {}", entries.len(), rx.borrow().name);
        entries.push(Entry {
            rx,
            join: Some(join),
            outcome: None,
        });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Current state of every tracked file.
    pub fn snapshot(&self) -> Vec<TrackedFile> {
        self.lock().iter().map(|e| e.rx.borrow().clone()).collect()
    }

    /// Receivers for rendering; each yields on every change of its file.
    pub fn watchers(&self) -> Vec<watch::Receiver<TrackedFile>> {
        self.lock().iter().map(|e| e.rx.clone()).collect()
    }

    /// Receivers for files at index `from` onwards.
    pub fn watchers_from(&self, from: usize) -> Vec<watch::Receiver<TrackedFile>> {
        self.lock().iter().skip(from).map(|e| e.rx.clone()).collect()
    }

    /// Wait for every tracker not yet awaited and return its outcome.
    ///
    /// With the default unbounded poll limit this only returns once every
    /// artifact has appeared. Each outcome is also recorded, so if one tracker
    /// failed the others stay available through [`outcomes`](Self::outcomes).
    pub async fn wait_all(&self) -> Result<Vec<(String, TrackerOutcome)>, UploadError> {
        let mut pending: Vec<(usize, String, JoinHandle<TrackerOutcome>)> = self
            .lock()
            .iter_mut()
            .enumerate()
            .filter_map(|(i, e)| e.join.take().map(|j| (i, e.rx.borrow().name.clone(), j)))
            .collect();

        let handles: Vec<_> = pending.iter_mut().map(|(_, _, j)| j).collect();
        let results = join_all(handles).await;

        let mut outcomes = Vec::with_capacity(results.len());
        let mut first_failure = None;
        {
            let mut entries = self.lock();
            for ((index, name, _), result) in pending.into_iter().zip(results) {
                match result {
                    Ok(outcome) => {
                        entries[index].outcome = Some(outcome);
                        outcomes.push((name, outcome));
                    }
                    Err(e) => {
                        error!("Tracker for '{}' did not finish: {}", name, e);
                        if first_failure.is_none() {
                            first_failure = Some(UploadError::Internal(format!(
                                "tracker for '{name}' did not finish: {e}"
                            )));
                        }
                    }
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(outcomes),
        }
    }

    /// Outcomes recorded by [`wait_all`](Self::wait_all) so far, in
    /// submission order. Trackers still running or never awaited are absent.
    pub fn outcomes(&self) -> Vec<(String, TrackerOutcome)> {
        self.lock()
            .iter()
            .filter_map(|e| e.outcome.map(|o| (e.rx.borrow().name.clone(), o)))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
