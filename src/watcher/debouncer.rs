//! Debouncing of file change events.
//!
//! Editors save in bursts (write, rename, touch); a path is only reported
//! once it has been quiet for the configured duration, with the burst
//! folded into a single change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::indexing::DeltaKind;

#[derive(Debug)]
pub struct Debouncer {
    /// path -> (folded change, last event time)
    pending: HashMap<PathBuf, (DeltaKind, Instant)>,
    duration: Duration,
}

impl Debouncer {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            duration: Duration::from_millis(debounce_ms),
        }
    }

    /// Record a change and restart the quiet period for `path`.
    pub fn record(&mut self, path: PathBuf, change: DeltaKind) {
        let now = Instant::now();
        let folded = match self.pending.get(&path) {
            Some((previous, _)) => fold(*previous, change),
            None => change,
        };
        self.pending.insert(path, (folded, now));
    }

    pub fn remove(&mut self, path: &Path) {
        self.pending.remove(path);
    }

    /// Take every path that has been quiet for the debounce duration.
    pub fn take_ready(&mut self) -> Vec<(PathBuf, DeltaKind)> {
        let now = Instant::now();
        let mut ready = Vec::new();
        self.pending.retain(|path, (change, last)| {
            if now.duration_since(*last) >= self.duration {
                ready.push((path.clone(), *change));
                false
            } else {
                true
            }
        });
        ready.sort_by(|a, b| a.0.cmp(&b.0));
        ready
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Net effect of two consecutive changes to the same path.
fn fold(previous: DeltaKind, next: DeltaKind) -> DeltaKind {
    match (previous, next) {
        (DeltaKind::Added, DeltaKind::Changed) => DeltaKind::Added,
        (DeltaKind::Removed, DeltaKind::Added) => DeltaKind::Changed,
        (_, next) => next,
    }
}
