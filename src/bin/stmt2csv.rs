//! CLI binary for stmt2csv.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `UploaderConfig`, submits the given statements and renders one live
//! progress bar per tracked file.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stmt2csv::{
    Endpoints, ListingResponse, ListingSource, Phase, PollLimit, SessionId, TrackedFile,
    TrackerOutcome, UploadCoordinator, UploaderConfig,
};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── Per-file progress bars ───────────────────────────────────────────────────

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:<28.bold} [{bar:36.green/238}] {pos:>3}%  {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"])
}

fn truncate_name(name: &str) -> String {
    if name.chars().count() > 28 {
        let head: String = name.chars().take(27).collect();
        format!("{head}\u{2026}")
    } else {
        name.to_string()
    }
}

/// Mirror one tracker's published state onto its bar until it finishes.
///
/// A tracker that gives up drops its sender without reaching `Complete`;
/// the bar is then abandoned in place.
fn spawn_bar(multi: &MultiProgress, mut rx: watch::Receiver<TrackedFile>) -> JoinHandle<()> {
    let bar = multi.add(ProgressBar::new(100));
    bar.set_style(bar_style());
    bar.set_prefix(truncate_name(&rx.borrow().name));
    bar.enable_steady_tick(Duration::from_millis(120));

    tokio::spawn(async move {
        loop {
            let file = rx.borrow_and_update().clone();
            bar.set_position(file.progress_percent.floor() as u64);
            match file.phase {
                Phase::Animating => bar.set_message(dim(&format!(
                    "converting, est. {}s",
                    file.estimated_seconds
                ))),
                Phase::AwaitingConfirmation => bar.set_message(cyan("finishing…")),
                Phase::Complete => {
                    bar.set_position(100);
                    bar.finish_with_message(green("✓ csv ready"));
                    return;
                }
            }
            if rx.changed().await.is_err() {
                bar.abandon_with_message(red("✗ no csv yet, gave up"));
                return;
            }
        }
    })
}

// ── Library view ─────────────────────────────────────────────────────────────

fn format_listing(listing: &ListingResponse) -> String {
    let csvs: Vec<&str> = listing
        .files
        .iter()
        .map(|f| f.name.as_str())
        .filter(|n| n.ends_with(".csv"))
        .collect();
    if csvs.is_empty() {
        format!("{} library: no converted files yet", cyan("◆"))
    } else {
        format!(
            "{} library: {} converted  {}",
            cyan("◆"),
            bold(&csvs.len().to_string()),
            dim(&csvs.join(", "))
        )
    }
}

async fn show_listing(
    listing: &dyn ListingSource,
    session: &SessionId,
    multi: &MultiProgress,
    show: bool,
) {
    match listing.list_files(session).await {
        Ok(l) if show => {
            multi.println(format_listing(&l)).ok();
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Library refresh failed: {e}"),
    }
}

/// Re-fetch and print the listing every time the refresh signal fires.
///
/// Runs until `stop` resolves. Refreshes already queued at that point, such
/// as the one fired by the last completing tracker, still get their listing.
fn spawn_library_view(
    coordinator: &UploadCoordinator,
    session: SessionId,
    multi: MultiProgress,
    show: bool,
    mut stop: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    let mut refreshes = coordinator.signal().subscribe();
    let listing: Arc<dyn ListingSource> = Arc::clone(coordinator.listing());
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                more = refreshes.recv() => {
                    if !more {
                        break;
                    }
                    show_listing(listing.as_ref(), &session, &multi, show).await;
                }
                _ = &mut stop => {
                    let mut queued = false;
                    while refreshes.try_recv() {
                        queued = true;
                    }
                    if queued {
                        show_listing(listing.as_ref(), &session, &multi, show).await;
                    }
                    break;
                }
            }
        }
    })
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Upload two statements against the local development backend
  stmt2csv --dev --session-id 3f0c9a march.pdf april.pdf

  # Upload to a deployed instance
  stmt2csv --base-url https://statements.example.com --session-id 3f0c9a march.pdf

  # Give up on a file after 5 minutes of polling (150 polls × 2 s)
  stmt2csv --max-poll-attempts 150 march.pdf

  # Show what has been converted for a session
  stmt2csv --list-only --session-id 3f0c9a

  # Machine-readable final state
  stmt2csv --json march.pdf > state.json

ROUTING:
  --dev (default)   uploads → http://127.0.0.1:5328/api/python
                    listing → http://127.0.0.1:3000/api/files
  --base-url URL    uploads → URL/api/python, listing → URL/api/files

LIMITS:
  Only application/pdf files up to 50 MiB are accepted. One invalid file
  rejects the whole batch; nothing is uploaded.

ENVIRONMENT VARIABLES:
  STMT2CSV_SESSION_ID     Session identifier sent with every request
  STMT2CSV_BASE_URL       Same-origin base URL of a deployed instance
  RUST_LOG                Override the log filter (e.g. stmt2csv=debug)
"#;

/// Upload PDF bank statements for CSV conversion and track their progress.
#[derive(Parser, Debug)]
#[command(
    name = "stmt2csv",
    version,
    about = "Upload PDF bank statements for CSV conversion and track their progress",
    long_about = "Submit one or more PDF bank statements to the conversion service, then follow \
each file with a progress bar until its CSV shows up in the session's file listing.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF statements to upload, submitted as one batch.
    #[arg(required_unless_present = "list_only")]
    files: Vec<PathBuf>,

    /// Session identifier scoping uploads and listings (empty if unset).
    #[arg(long, env = "STMT2CSV_SESSION_ID", default_value = "")]
    session_id: String,

    /// Base URL of a deployed instance (same-origin API paths).
    #[arg(long, env = "STMT2CSV_BASE_URL")]
    base_url: Option<String>,

    /// Use the split local-development routing.
    #[arg(long, conflicts_with = "base_url")]
    dev: bool,

    /// Stop polling for a file's CSV after this many attempts (default: never).
    #[arg(long, env = "STMT2CSV_MAX_POLL_ATTEMPTS",
          value_parser = clap::value_parser!(u32).range(1..))]
    max_poll_attempts: Option<u32>,

    /// Animation tick in milliseconds; one tick is one estimated second.
    #[arg(long, env = "STMT2CSV_TICK_MS", default_value_t = 1000,
          value_parser = clap::value_parser!(u64).range(1..))]
    tick_ms: u64,

    /// Delay between listing polls in milliseconds.
    #[arg(long, env = "STMT2CSV_POLL_MS", default_value_t = 2000,
          value_parser = clap::value_parser!(u64).range(1..))]
    poll_ms: u64,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "STMT2CSV_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Print the session's converted-file listing and exit.
    #[arg(long)]
    list_only: bool,

    /// Output final tracked-file state and listing as JSON.
    #[arg(long, env = "STMT2CSV_JSON")]
    json: bool,

    /// Disable progress bars.
    #[arg(long, env = "STMT2CSV_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "STMT2CSV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "STMT2CSV_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Progress bars already show per-file state; keep library INFO logs out
    // of their way unless asked for.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;
    let session = SessionId::new(cli.session_id.clone());
    let coordinator = UploadCoordinator::new(config).context("Failed to set up HTTP client")?;

    // ── List-only mode ───────────────────────────────────────────────────
    if cli.list_only {
        let listing = coordinator
            .listing()
            .list_files(&session)
            .await
            .context("Failed to fetch listing")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&listing).context("Failed to serialise listing")?
            );
        } else {
            for f in &listing.files {
                println!("{}", f.name);
            }
        }
        return Ok(());
    }

    // ── Submit ───────────────────────────────────────────────────────────
    let multi = if show_progress {
        MultiProgress::new()
    } else {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    };
    let (stop_library, library_stop) = oneshot::channel();
    let library = spawn_library_view(
        &coordinator,
        session.clone(),
        multi.clone(),
        !cli.quiet && !cli.json,
        library_stop,
    );

    let receipt = coordinator
        .submit_paths(&cli.files, &session)
        .await
        .context("Upload failed")?;

    if !cli.quiet && !cli.json {
        if let Some(ref msg) = receipt.message {
            multi.println(format!("{} {}", cyan("◆"), msg)).ok();
        }
        for declined in &receipt.not_saved {
            multi
                .println(format!(
                    "  {} {}  {}",
                    red("✗"),
                    declined.file_name,
                    dim(declined.error.as_deref().unwrap_or("not saved"))
                ))
                .ok();
        }
    }

    // ── Track ────────────────────────────────────────────────────────────
    let bars: Vec<JoinHandle<()>> = coordinator
        .tracked()
        .watchers()
        .into_iter()
        .map(|rx| spawn_bar(&multi, rx))
        .collect();

    let outcomes = coordinator.tracked().wait_all().await?;
    for bar in bars {
        bar.await.ok();
    }
    stop_library.send(()).ok();
    library.await.ok();

    // ── Report ───────────────────────────────────────────────────────────
    let gave_up: Vec<&str> = outcomes
        .iter()
        .filter(|(_, o)| matches!(o, TrackerOutcome::GaveUp { .. }))
        .map(|(name, _)| name.as_str())
        .collect();

    if cli.json {
        let listing = coordinator.listing().list_files(&session).await.ok();
        let report = serde_json::json!({
            "session_id": session,
            "files": coordinator.tracked().snapshot(),
            "outcomes": outcomes.iter().map(|(n, o)| serde_json::json!({"name": n, "outcome": o})).collect::<Vec<_>>(),
            "listing": listing,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        let done = outcomes.len() - gave_up.len();
        eprintln!(
            "{} {}/{} statements converted",
            if gave_up.is_empty() { green("✔") } else { red("✘") },
            bold(&done.to_string()),
            outcomes.len()
        );
    }

    if !gave_up.is_empty() {
        anyhow::bail!("No CSV appeared for: {}", gave_up.join(", "));
    }
    Ok(())
}

/// Map CLI args to `UploaderConfig`.
fn build_config(cli: &Cli) -> Result<UploaderConfig> {
    let endpoints = match (&cli.base_url, cli.dev) {
        (Some(base), false) => Endpoints::for_base(base),
        _ => Endpoints::development(),
    };
    let poll_limit = cli
        .max_poll_attempts
        .map(PollLimit::MaxAttempts)
        .unwrap_or_default();

    UploaderConfig::builder()
        .endpoints(endpoints)
        .tick_interval(Duration::from_millis(cli.tick_ms))
        .poll_interval(Duration::from_millis(cli.poll_ms))
        .poll_limit(poll_limit)
        .request_timeout_secs(cli.timeout)
        .build()
        .context("Invalid configuration")
}
