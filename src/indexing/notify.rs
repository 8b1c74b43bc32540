//! Index-change notification.
//!
//! Deltas are handed to a dedicated thread over a channel, so slow
//! listeners never hold up the indexing worker. Each listener is called in
//! isolation: a panicking listener is logged and the rest still run.

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::IndexResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDeltaKind {
    /// A translation unit (and the headers it pulled in) was indexed.
    FileIndexed,
    FileRemoved,
    FolderRemoved,
    /// A whole-project walk finished.
    ProjectIndexed,
    /// The project's index was deleted.
    IndexRemoved,
    Saved,
}

/// What changed in an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDelta {
    pub project: PathBuf,
    pub kind: IndexDeltaKind,
    pub path: Option<PathBuf>,
}

impl IndexDelta {
    pub fn new(project: impl Into<PathBuf>, kind: IndexDeltaKind) -> Self {
        Self {
            project: project.into(),
            kind,
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

pub trait IndexChangeListener: Send + Sync {
    fn index_changed(&self, delta: &IndexDelta);
}

impl<F> IndexChangeListener for F
where
    F: Fn(&IndexDelta) + Send + Sync,
{
    fn index_changed(&self, delta: &IndexDelta) {
        self(delta)
    }
}

type Listeners = Arc<Mutex<Vec<Arc<dyn IndexChangeListener>>>>;

pub struct Notifier {
    listeners: Listeners,
    sender: Mutex<Option<Sender<IndexDelta>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Notifier {
    pub fn new() -> IndexResult<Self> {
        let listeners: Listeners = Arc::new(Mutex::new(Vec::new()));
        let (sender, receiver) = unbounded();
        let worker_listeners = Arc::clone(&listeners);
        let handle = thread::Builder::new()
            .name("ccindex-notify".to_string())
            .spawn(move || deliver(receiver, worker_listeners))?;

        Ok(Self {
            listeners,
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn add_listener(&self, listener: Arc<dyn IndexChangeListener>) {
        let mut listeners = self.listeners.lock();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Returns whether the listener was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn IndexChangeListener>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Queue `delta` for delivery. Dropped when nobody listens.
    pub fn notify(&self, delta: IndexDelta) {
        if self.listeners.lock().is_empty() {
            return;
        }
        if let Some(sender) = self.sender.lock().as_ref() {
            if sender.send(delta).is_err() {
                tracing::debug!(target: "indexer", "notifier closed, dropping delta");
            }
        }
    }

    /// Deliver what is queued, then stop the notification thread.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(target: "indexer", "notification thread terminated abnormally");
            }
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn deliver(receiver: Receiver<IndexDelta>, listeners: Listeners) {
    for delta in receiver {
        // Copy out so no lock is held while listeners run.
        let snapshot: Vec<Arc<dyn IndexChangeListener>> = listeners.lock().clone();
        for listener in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.index_changed(&delta)));
            if outcome.is_err() {
                tracing::error!(
                    target: "indexer",
                    "index change listener panicked on {:?} for {}",
                    delta.kind,
                    delta.project.display()
                );
            }
        }
    }
}
