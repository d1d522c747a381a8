//! Poll loop state tracking
//!
//! One `WorkerState` is owned by one `Worker`; nothing is shared globally.
//! The only cross-task handle is `StopHandle`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::types::{TaskId, WorkerRecord};

// ─────────────────────────────────────────────────────────────────
// Worker State
// ─────────────────────────────────────────────────────────────────

/// Lifecycle phase of the poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerPhase {
    #[default]
    NotStarted,
    Active,
    Finished,
}

/// Mutable state of one poll loop
#[derive(Debug, Clone, Default)]
pub struct WorkerState {
    pub phase: WorkerPhase,

    /// When `start` was called
    pub started_at: Option<Instant>,

    /// Batches completed so far
    pub loops: u64,

    /// Registered identity, absent for anonymous workers
    pub identity: Option<WorkerRecord>,

    /// Task currently being executed
    pub current_task: Option<TaskId>,

    /// Totals across all batches
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_skipped: u64,
}

impl WorkerState {
    /// Time since the loop started
    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn worker_id(&self) -> Option<u64> {
        self.identity.as_ref().map(|w| w.worker_id)
    }
}

/// What happened during one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Tasks the store refused to mark started or to release
    pub skipped: usize,
    /// The store could not be queried
    pub fetch_failed: bool,
    /// The fetch failure is expected to clear on its own
    pub fetch_retryable: bool,
}

// ─────────────────────────────────────────────────────────────────
// Stop Handle
// ─────────────────────────────────────────────────────────────────

/// Requests a running loop to stop between batches
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop; an in-flight task still runs to completion
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless stopped first. Returns true if stopped.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_stopped(),
            _ = self.notify.notified() => true,
        }
    }
}
