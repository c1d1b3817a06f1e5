//! Completion registry: the hand-off point between the dispatcher's worker
//! thread and the HTTP handlers waiting on their results.
//!
//! The registry is the only state shared across the concurrency boundary.
//! The worker publishes exactly one [`Completion`] per job id; the handler
//! that submitted the job waits for it with a deadline and consumes it.
//! Entries whose waiter gave up are reclaimed by a periodic sweep so
//! abandoned results never accumulate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Engine-side failure, carried across the boundary as a short fixed tag
/// rather than an error type, since no call stack connects the worker to the
/// waiting handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFailure {
    /// Page load failed
    Load,
    /// Pixel surface could not be allocated
    Surface,
    /// Drawing context could not be activated
    Context,
    /// Encoder produced no bytes
    Buffer,
    /// Image encoding failed
    Encode,
}

impl RenderFailure {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Load => "render-failed",
            Self::Surface => "surface-allocation-failed",
            Self::Context => "context-unavailable",
            Self::Buffer => "buffer-failed",
            Self::Encode => "encode-failed",
        }
    }
}

/// The single published outcome for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Encoded image bytes
    Image(Vec<u8>),
    /// Engine failure tag
    Failed(RenderFailure),
}

struct Entry {
    completion: Completion,
    published_at: Instant,
}

/// Concurrent id -> completion map shared by all workers and handlers.
///
/// Cloning is cheap; all clones share the same maps.
#[derive(Clone)]
pub struct CompletionRegistry {
    entries: Arc<DashMap<String, Entry>>,
    signals: Arc<DashMap<String, Arc<Notify>>>,
    reclaim_after: Duration,
}

impl CompletionRegistry {
    /// `reclaim_after` bounds how long an unconsumed entry may linger before
    /// the sweep drops it. It should exceed the wait deadline so a result is
    /// never reclaimed while its waiter is still listening.
    pub fn new(reclaim_after: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            signals: Arc::new(DashMap::new()),
            reclaim_after,
        }
    }

    /// Publish the completion for `id` and wake its waiter, if any.
    ///
    /// Sync-callable so the dispatcher's worker thread can publish without a
    /// runtime handle. At most one publish per id is ever issued.
    pub fn publish(&self, id: &str, completion: Completion) {
        self.entries.insert(
            id.to_string(),
            Entry {
                completion,
                published_at: Instant::now(),
            },
        );
        if let Some(signal) = self.signals.get(id) {
            signal.notify_one();
        }
    }

    /// Remove and return the completion for `id`. A second call for the same
    /// id returns `None`, never stale data.
    pub fn consume(&self, id: &str) -> Option<Completion> {
        self.entries.remove(id).map(|(_, entry)| entry.completion)
    }

    /// Wait until the completion for `id` is published, then consume it.
    ///
    /// Returns `None` once `deadline` elapses; a completion published after
    /// that stays in the map for the sweep to reclaim. A one-shot permit on
    /// the per-id signal covers the publish-before-await race.
    pub async fn wait(&self, id: &str, deadline: Duration) -> Option<Completion> {
        let signal = self
            .signals
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();
        // The handler future driving this wait can be dropped mid-await
        // (client disconnect); the guard unregisters the signal on every
        // exit path, not just completion.
        let _guard = WaiterGuard {
            signals: &*self.signals,
            id,
        };

        tokio::time::timeout(deadline, async {
            loop {
                if let Some(completion) = self.consume(id) {
                    return completion;
                }
                signal.notified().await;
            }
        })
        .await
        .ok()
    }

    /// Number of published, not-yet-consumed entries.
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Number of registered waiter signals.
    pub fn waiters(&self) -> usize {
        self.signals.len()
    }

    /// Drop entries older than the reclaim TTL; returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let ttl = self.reclaim_after;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.published_at.elapsed() <= ttl);
        let reclaimed = before - self.entries.len();
        if reclaimed > 0 {
            debug!(reclaimed, "reclaimed unconsumed render results");
        }
        reclaimed
    }

    /// Run the reclaim sweep on a fixed interval until the task is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                registry.sweep();
            }
        })
    }
}

// Unregisters a waiter's signal when its wait ends, whether it resolved,
// timed out, or was dropped.
struct WaiterGuard<'a> {
    signals: &'a DashMap<String, Arc<Notify>>,
    id: &'a str,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.signals.remove(self.id);
    }
}
