//! Indexer facade and the jobs it runs.
//!
//! ```text
//! ResourceDelta / add_source / index_all
//!        |
//!   SourceIndexer ──request──> JobQueue ──worker──> IndexerCore::execute
//!        |                                             |
//!   Notifier <────────────── index_job_finished ───────+
//! ```

pub mod facade;
pub mod notify;
pub mod requests;
pub mod walker;
pub mod workspace;

pub use facade::SourceIndexer;
pub use notify::{IndexChangeListener, IndexDelta, IndexDeltaKind, Notifier};
pub use requests::IndexingStats;
pub use walker::{FileWalker, WalkedFiles};
pub use workspace::Workspace;

use std::path::PathBuf;

/// Granularity of a resource change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Project,
    Folder,
    CompilationUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaKind {
    Added,
    Changed,
    Removed,
}

/// One change reported by the host or the workspace watcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceDelta {
    pub project: PathBuf,
    pub path: PathBuf,
    pub kind: ResourceKind,
    pub change: DeltaKind,
}

impl ResourceDelta {
    pub fn new(
        project: impl Into<PathBuf>,
        path: impl Into<PathBuf>,
        kind: ResourceKind,
        change: DeltaKind,
    ) -> Self {
        Self {
            project: project.into(),
            path: path.into(),
            kind,
            change,
        }
    }
}
