//! Library refresh signal: a payload-free "re-fetch your listing now" event.
//!
//! The coordinator fires it once per successful submission and every tracker
//! fires it once when its artifact appears. Consumers (a listing view, the
//! CLI's library printout) should re-fetch their own state; the signal says
//! nothing about *what* changed.
//!
//! Two ways to consume it:
//!
//! * register a [`RefreshListener`] — called synchronously on the notifying
//!   task, so keep it cheap (flip a flag, poke a channel);
//! * [`RefreshSignal::subscribe`] — an async receiver. Bursts may coalesce:
//!   a subscriber that falls behind sees one signal rather than many.
//!
//! Delivery is at-least-once. Consumers must tolerate repeats.
//!
//! # Example
//!
//! ```rust
//! use stmt2csv::{RefreshListener, RefreshSignal};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingListener(AtomicUsize);
//!
//! impl RefreshListener for CountingListener {
//!     fn on_refresh(&self) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let signal = RefreshSignal::new();
//! let counter = Arc::new(CountingListener(AtomicUsize::new(0)));
//! signal.add_listener(counter.clone());
//! signal.notify();
//! assert_eq!(counter.0.load(Ordering::SeqCst), 1);
//! ```

use futures::Stream;
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

/// Pending signals a slow subscriber may have queued before they coalesce.
const SUBSCRIBER_BACKLOG: usize = 16;

/// Receives refresh notifications.
///
/// Must be `Send + Sync`: trackers run on separate tokio tasks and may notify
/// concurrently.
pub trait RefreshListener: Send + Sync {
    fn on_refresh(&self);
}

impl<F> RefreshListener for F
where
    F: Fn() + Send + Sync,
{
    fn on_refresh(&self) {
        self()
    }
}

/// A listener that ignores every signal.
pub struct NoopRefreshListener;

impl RefreshListener for NoopRefreshListener {
    fn on_refresh(&self) {}
}

/// Shared publish/subscribe hub for refresh notifications.
pub struct RefreshSignal {
    listeners: RwLock<Vec<Arc<dyn RefreshListener>>>,
    tx: broadcast::Sender<()>,
    fired: AtomicU64,
}

impl Default for RefreshSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RefreshSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshSignal")
            .field("listeners", &self.listener_count())
            .field("subscribers", &self.tx.receiver_count())
            .field("fired", &self.fired())
            .finish()
    }
}

impl RefreshSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_BACKLOG);
        Self {
            listeners: RwLock::new(Vec::new()),
            tx,
            fired: AtomicU64::new(0),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn RefreshListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Open an async receiver. Only signals sent after this call are seen.
    pub fn subscribe(&self) -> RefreshSubscription {
        RefreshSubscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Publish one refresh to every listener and subscriber.
    pub fn notify(&self) {
        let n = self.fired.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Refresh signal #{}", n);

        // Snapshot so a listener may register further listeners without
        // deadlocking on the lock.
        let listeners: Vec<Arc<dyn RefreshListener>> = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in listeners {
            listener.on_refresh();
        }

        // No subscribers is fine.
        let _ = self.tx.send(());
    }

    /// Total number of notifications published so far.
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::SeqCst)
    }
}

/// Async receiving end of a [`RefreshSignal`].
pub struct RefreshSubscription {
    rx: broadcast::Receiver<()>,
}

impl RefreshSubscription {
    /// Wait for the next refresh. Returns `false` once the signal is dropped.
    ///
    /// A subscriber that fell behind gets a single `true` for the whole
    /// backlog it missed.
    pub async fn recv(&mut self) -> bool {
        match self.rx.recv().await {
            Ok(()) => true,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Refresh subscriber coalesced {} signals", skipped);
                true
            }
            Err(broadcast::error::RecvError::Closed) => false,
        }
    }

    /// Take a refresh that is already queued without waiting for one.
    ///
    /// Like [`recv`](Self::recv), a lagged backlog counts as one refresh.
    pub fn try_recv(&mut self) -> bool {
        match self.rx.try_recv() {
            Ok(()) => true,
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                debug!("Refresh subscriber coalesced {} signals", skipped);
                true
            }
            Err(broadcast::error::TryRecvError::Empty)
            | Err(broadcast::error::TryRecvError::Closed) => false,
        }
    }

    /// Adapt into a `Stream` yielding `()` per (possibly coalesced) refresh.
    pub fn into_stream(self) -> impl Stream<Item = ()> + Send + Unpin {
        BroadcastStream::new(self.rx).map(|_| ())
    }
}
