//! Per-file progress tracker: animate, stall, then confirm by polling.
//!
//! The backend converts out-of-band and offers no progress channel, so the
//! tracker *simulates* progress and then checks for the real result:
//!
//! ```text
//!   Animating ──(step ≥ estimate − stall)──▶ AwaitingConfirmation ──(artifact listed)──▶ Complete
//!   1 tick/s, percent = 100·step/estimate     poll every 2 s, percent frozen           percent = 100
//! ```
//!
//! [`ProgressTracker`] is the pure state machine: [`ProgressTracker::tick`]
//! and [`ProgressTracker::record_poll`] are synchronous and can be stepped
//! directly in tests. [`ProgressTracker::run`] is the async driver that owns
//! the two timers and the listing source. It uses tokio time, so a paused
//! runtime serves as a virtual clock.

use crate::backend::ListingSource;
use crate::config::{PollLimit, TrackerTiming};
use crate::error::PollError;
use crate::estimate::estimated_seconds;
use crate::model::{ListingResponse, Phase, SessionId, TrackedFile};
use crate::signal::RefreshSignal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Name of the CSV the backend writes for `source`.
///
/// The backend swaps every literal, lowercase `.pdf` for `.csv` and leaves
/// anything else alone, so `scan.PDF` is expected back as `scan.PDF`.
pub fn artifact_name(source: &str) -> String {
    source.replace(".pdf", ".csv")
}

/// Result of one animation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Percent moved forward.
    Advanced,
    /// The stall point was reached; the tracker now awaits confirmation.
    Stalled,
    /// Not animating any more; nothing changed.
    Idle,
}

/// Result of feeding one poll into the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The artifact was listed; the file is complete.
    Confirmed,
    /// Not there yet (or the poll failed); poll again.
    Pending,
    /// The poll budget ran out without a match.
    Exhausted,
}

/// How a tracker's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerOutcome {
    Completed { polls: u32 },
    GaveUp { polls: u32 },
}

impl TrackerOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TrackerOutcome::Completed { .. })
    }
}

/// Two-phase progress state machine for one uploaded file.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    file: TrackedFile,
    artifact: String,
    current_step: u64,
    stall_ticks: u64,
    poll_limit: PollLimit,
    polls: u32,
    gave_up: bool,
}

impl ProgressTracker {
    pub fn new(name: impl Into<String>, byte_size: u64, timing: &TrackerTiming) -> Self {
        let name = name.into();
        let artifact = artifact_name(&name);
        Self {
            file: TrackedFile {
                name,
                byte_size,
                estimated_seconds: estimated_seconds(byte_size),
                progress_percent: 0.0,
                phase: Phase::Animating,
            },
            artifact,
            current_step: 0,
            // 100% belongs to a confirmed artifact, never to the animation.
            stall_ticks: timing.stall_ticks.max(1),
            poll_limit: timing.poll_limit,
            polls: 0,
            gave_up: false,
        }
    }

    pub fn snapshot(&self) -> &TrackedFile {
        &self.file
    }

    pub fn phase(&self) -> Phase {
        self.file.phase
    }

    pub fn progress_percent(&self) -> f64 {
        self.file.progress_percent
    }

    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    /// Advance the animation by one tick.
    pub fn tick(&mut self) -> TickOutcome {
        if self.file.phase != Phase::Animating {
            return TickOutcome::Idle;
        }

        let estimate = self.file.estimated_seconds;
        let stall_at = estimate.saturating_sub(self.stall_ticks);
        if self.current_step < stall_at {
            self.current_step += 1;
            self.file.progress_percent = 100.0 * self.current_step as f64 / estimate as f64;
            TickOutcome::Advanced
        } else {
            self.file.phase = Phase::AwaitingConfirmation;
            debug!(
                "{}: stalled at {:.1}% after {} ticks, awaiting {}",
                self.file.name, self.file.progress_percent, self.current_step, self.artifact
            );
            TickOutcome::Stalled
        }
    }

    /// Feed the result of one listing poll.
    ///
    /// Polls outside `AwaitingConfirmation` are ignored. A failed poll counts
    /// against the [`PollLimit`] but never changes the phase.
    pub fn record_poll(&mut self, result: Result<&ListingResponse, &PollError>) -> PollOutcome {
        match self.file.phase {
            Phase::Animating => return PollOutcome::Pending,
            Phase::Complete => return PollOutcome::Confirmed,
            Phase::AwaitingConfirmation if self.gave_up => return PollOutcome::Exhausted,
            Phase::AwaitingConfirmation => {}
        }

        self.polls += 1;
        match result {
            Ok(listing) if listing.contains(&self.artifact) => {
                self.file.progress_percent = 100.0;
                self.file.phase = Phase::Complete;
                return PollOutcome::Confirmed;
            }
            Ok(listing) => {
                debug!(
                    "{}: poll {}: {} not among {} listed file(s)",
                    self.file.name,
                    self.polls,
                    self.artifact,
                    listing.files.len()
                );
            }
            Err(e) => {
                warn!("{}: poll {} failed ({}), retrying", self.file.name, self.polls, e);
            }
        }

        if self.poll_limit.is_exhausted(self.polls) {
            self.gave_up = true;
            PollOutcome::Exhausted
        } else {
            PollOutcome::Pending
        }
    }

    /// Drive the tracker to completion on tokio timers.
    ///
    /// Every state change is published on `state`. The refresh signal fires
    /// exactly once, on completion. Both timers are dropped on return.
    pub async fn run(
        mut self,
        ctx: TrackerContext,
        state: watch::Sender<TrackedFile>,
    ) -> TrackerOutcome {
        info!(
            "{}: tracking, estimated {}s",
            self.file.name, self.file.estimated_seconds
        );

        // ── Animating ────────────────────────────────────────────────────
        let tick = ctx.timing.tick_interval;
        let mut animation = interval_at(Instant::now() + tick, tick);
        animation.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            animation.tick().await;
            match self.tick() {
                TickOutcome::Advanced => {
                    state.send_replace(self.file.clone());
                }
                TickOutcome::Stalled | TickOutcome::Idle => {
                    state.send_replace(self.file.clone());
                    break;
                }
            }
        }
        drop(animation);

        // ── AwaitingConfirmation ─────────────────────────────────────────
        let every = ctx.timing.poll_interval;
        let mut poll = interval_at(Instant::now() + every, every);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            poll.tick().await;
            let result = ctx.listing.list_files(&ctx.session).await;
            match self.record_poll(result.as_ref()) {
                PollOutcome::Pending => continue,
                PollOutcome::Confirmed => {
                    state.send_replace(self.file.clone());
                    info!(
                        "{}: {} is ready after {} poll(s)",
                        self.file.name, self.artifact, self.polls
                    );
                    ctx.signal.notify();
                    return TrackerOutcome::Completed { polls: self.polls };
                }
                PollOutcome::Exhausted => {
                    warn!(
                        "{}: giving up after {} poll(s) without seeing {}",
                        self.file.name, self.polls, self.artifact
                    );
                    return TrackerOutcome::GaveUp { polls: self.polls };
                }
            }
        }
    }
}

/// What a running tracker needs besides its own state.
#[derive(Clone)]
pub struct TrackerContext {
    pub session: SessionId,
    pub listing: Arc<dyn ListingSource>,
    pub signal: Arc<RefreshSignal>,
    pub timing: TrackerTiming,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimate::MEBIBYTE;
    use crate::model::ListedFile;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn listing(names: &[&str]) -> ListingResponse {
        ListingResponse {
            files: names
                .iter()
                .map(|n| ListedFile {
                    name: n.to_string(),
                    extra: Default::default(),
                })
                .collect(),
        }
    }

    /// Answers polls from a script; once the script runs out, keeps
    /// answering with the last entry.
    struct ScriptedListing {
        script: Mutex<VecDeque<Result<ListingResponse, PollError>>>,
        last: Mutex<Result<ListingResponse, PollError>>,
        calls: AtomicU32,
    }

    impl ScriptedListing {
        fn new(script: Vec<Result<ListingResponse, PollError>>) -> Arc<Self> {
            let last = script
                .last()
                .cloned()
                .unwrap_or_else(|| Ok(ListingResponse::default()));
            Arc::new(Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(last),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ListingSource for ScriptedListing {
        async fn list_files(&self, _session: &SessionId) -> Result<ListingResponse, PollError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(r) => r,
                None => self.last.lock().unwrap().clone(),
            }
        }
    }

    fn context(listing: Arc<ScriptedListing>, timing: TrackerTiming) -> (TrackerContext, Arc<RefreshSignal>) {
        let signal = Arc::new(RefreshSignal::new());
        let ctx = TrackerContext {
            session: SessionId::new("session-1"),
            listing,
            signal: Arc::clone(&signal),
            timing,
        };
        (ctx, signal)
    }

    #[test]
    fn artifact_name_swaps_extension() {
        assert_eq!(artifact_name("stmt.pdf"), "stmt.csv");
        assert_eq!(artifact_name("jan.2024.pdf"), "jan.2024.csv");
        assert_eq!(artifact_name("scan.PDF"), "scan.PDF");
        assert_eq!(artifact_name("noext"), "noext");
    }

    #[test]
    fn zero_stall_margin_still_stops_short_of_full() {
        let timing = TrackerTiming {
            stall_ticks: 0,
            ..TrackerTiming::default()
        };
        let mut t = ProgressTracker::new("stmt.pdf", MEBIBYTE, &timing);
        for _ in 0..30 {
            t.tick();
        }
        assert_eq!(t.phase(), Phase::AwaitingConfirmation);
        assert!(t.progress_percent() < 100.0);
        assert_eq!(t.polls(), 0);
    }

    #[test]
    fn stmt_scenario_stalls_then_completes() {
        let mut t = ProgressTracker::new("stmt.pdf", MEBIBYTE, &TrackerTiming::default());
        assert_eq!(t.snapshot().estimated_seconds, 30);

        for _ in 0..28 {
            assert_eq!(t.tick(), TickOutcome::Advanced);
        }
        assert_eq!(t.phase(), Phase::Animating);
        assert!((t.progress_percent() - 93.333).abs() < 0.01);

        assert_eq!(t.tick(), TickOutcome::Stalled);
        assert_eq!(t.phase(), Phase::AwaitingConfirmation);
        let frozen = t.progress_percent();

        // Further ticks are ignored.
        assert_eq!(t.tick(), TickOutcome::Idle);
        assert_eq!(t.progress_percent(), frozen);

        let ready = listing(&["other.csv", "stmt.csv"]);
        assert_eq!(t.record_poll(Ok(&ready)), PollOutcome::Confirmed);
        assert_eq!(t.phase(), Phase::Complete);
        assert_eq!(t.progress_percent(), 100.0);
        assert_eq!(t.tick(), TickOutcome::Idle);
    }

    #[test]
    fn never_completes_without_a_match() {
        let mut t = ProgressTracker::new("stmt.pdf", MEBIBYTE, &TrackerTiming::default());
        for _ in 0..500 {
            t.tick();
        }
        for _ in 0..50 {
            assert_eq!(
                t.record_poll(Ok(&listing(&["stmt.pdf", "else.csv"]))),
                PollOutcome::Pending
            );
        }
        assert_eq!(t.phase(), Phase::AwaitingConfirmation);
        assert!(t.progress_percent() < 100.0);
    }

    #[test]
    fn poll_before_stall_is_ignored() {
        let mut t = ProgressTracker::new("stmt.pdf", MEBIBYTE, &TrackerTiming::default());
        t.tick();
        assert_eq!(t.record_poll(Ok(&listing(&["stmt.csv"]))), PollOutcome::Pending);
        assert_eq!(t.phase(), Phase::Animating);
        assert_eq!(t.polls(), 0);
    }

    #[test]
    fn poll_errors_do_not_change_phase() {
        let mut t = ProgressTracker::new("a.pdf", MEBIBYTE, &TrackerTiming::default());
        while t.tick() != TickOutcome::Stalled {}
        let before = t.snapshot().clone();
        let err = PollError::Transport {
            detail: "connection reset".into(),
        };
        assert_eq!(t.record_poll(Err(&err)), PollOutcome::Pending);
        assert_eq!(t.snapshot(), &before);
        assert_eq!(t.record_poll(Ok(&listing(&["a.csv"]))), PollOutcome::Confirmed);
    }

    #[test]
    fn progress_is_monotonic_and_bounded() {
        let mut t = ProgressTracker::new("big.pdf", 5 * MEBIBYTE, &TrackerTiming::default());
        assert_eq!(t.snapshot().estimated_seconds, 90);
        let mut prev = t.progress_percent();
        for _ in 0..200 {
            t.tick();
            let now = t.progress_percent();
            assert!(now >= prev && now <= 100.0);
            prev = now;
        }
        assert_eq!(t.current_step(), 88);
        t.record_poll(Ok(&listing(&["big.csv"])));
        assert!(t.progress_percent() >= prev);
        assert_eq!(t.progress_percent(), 100.0);
    }

    #[test]
    fn max_attempts_exhausts() {
        let timing = TrackerTiming {
            poll_limit: PollLimit::MaxAttempts(2),
            ..TrackerTiming::default()
        };
        let mut t = ProgressTracker::new("a.pdf", 1, &timing);
        while t.tick() != TickOutcome::Stalled {}
        assert_eq!(t.record_poll(Ok(&listing(&[]))), PollOutcome::Pending);
        assert_eq!(t.record_poll(Ok(&listing(&[]))), PollOutcome::Exhausted);
        // Exhausted is sticky, and the phase never moves backwards.
        assert_eq!(t.record_poll(Ok(&listing(&["a.csv"]))), PollOutcome::Exhausted);
        assert_eq!(t.phase(), Phase::AwaitingConfirmation);
    }

    #[tokio::test(start_paused = true)]
    async fn run_completes_on_first_poll() {
        let source = ScriptedListing::new(vec![Ok(listing(&["stmt.csv"]))]);
        let (ctx, signal) = context(Arc::clone(&source), TrackerTiming::default());
        let tracker = ProgressTracker::new("stmt.pdf", MEBIBYTE, &ctx.timing);
        let (tx, mut rx) = watch::channel(tracker.snapshot().clone());

        let start = Instant::now();
        let handle = tokio::spawn(tracker.run(ctx, tx));

        tokio::time::sleep(Duration::from_millis(28_500)).await;
        {
            let seen = rx.borrow_and_update();
            assert_eq!(seen.phase, Phase::Animating);
            assert!((seen.progress_percent - 93.333).abs() < 0.01);
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rx.borrow().phase, Phase::AwaitingConfirmation);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        let outcome = handle.await.unwrap();
        assert_eq!(outcome, TrackerOutcome::Completed { polls: 1 });
        assert!(start.elapsed() >= Duration::from_secs(31));
        assert_eq!(rx.borrow().progress_percent, 100.0);
        assert_eq!(rx.borrow().phase, Phase::Complete);
        assert_eq!(signal.fired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_survives_poll_failures() {
        let source = ScriptedListing::new(vec![
            Err(PollError::Transport {
                detail: "refused".into(),
            }),
            Err(PollError::Status { status: 502 }),
            Ok(listing(&[])),
            Ok(listing(&["stmt.csv"])),
        ]);
        let (ctx, signal) = context(Arc::clone(&source), TrackerTiming::default());
        let tracker = ProgressTracker::new("stmt.pdf", MEBIBYTE, &ctx.timing);
        let (tx, rx) = watch::channel(tracker.snapshot().clone());

        let outcome = tracker.run(ctx, tx).await;
        assert_eq!(outcome, TrackerOutcome::Completed { polls: 4 });
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        assert_eq!(rx.borrow().phase, Phase::Complete);
        assert_eq!(signal.fired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_gives_up_when_capped() {
        let source = ScriptedListing::new(vec![Ok(listing(&[]))]);
        let timing = TrackerTiming {
            poll_limit: PollLimit::MaxAttempts(3),
            ..TrackerTiming::default()
        };
        let (ctx, signal) = context(Arc::clone(&source), timing);
        let tracker = ProgressTracker::new("stmt.pdf", MEBIBYTE, &ctx.timing);
        let (tx, rx) = watch::channel(tracker.snapshot().clone());

        let outcome = tracker.run(ctx, tx).await;
        assert_eq!(outcome, TrackerOutcome::GaveUp { polls: 3 });
        assert_eq!(rx.borrow().phase, Phase::AwaitingConfirmation);
        assert_eq!(signal.fired(), 0);
    }
}
