//! Cooperative cancellation and progress for running jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct ProgressState {
    canceled: AtomicBool,
    total: AtomicUsize,
    done: AtomicUsize,
}

/// Shared between the worker running a job and whoever may cancel it.
///
/// Cancellation is polled: jobs check [`is_canceled`](Self::is_canceled) on
/// entry and at safe points inside long walks.
#[derive(Debug, Clone, Default)]
pub struct ProgressMonitor {
    state: Arc<ProgressState>,
}

impl ProgressMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_canceled(&self) -> bool {
        self.state.canceled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.state.canceled.store(true, Ordering::Release);
    }

    /// Announce the amount of work for the current job.
    pub fn begin(&self, total: usize) {
        self.state.total.store(total, Ordering::Relaxed);
        self.state.done.store(0, Ordering::Relaxed);
    }

    pub fn worked(&self, units: usize) {
        self.state.done.fetch_add(units, Ordering::Relaxed);
    }

    /// `(done, total)`; total is zero until [`begin`](Self::begin) is called.
    pub fn progress(&self) -> (usize, usize) {
        (
            self.state.done.load(Ordering::Relaxed),
            self.state.total.load(Ordering::Relaxed),
        )
    }
}
