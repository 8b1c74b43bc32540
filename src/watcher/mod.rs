//! Workspace file watching.
//!
//! A single `notify` watcher on the workspace root, debounced, producing
//! [`ResourceDelta`](crate::indexing::ResourceDelta)s for the indexer.

mod debouncer;
mod error;
mod workspace;

pub use debouncer::Debouncer;
pub use error::WatchError;
pub use workspace::{DeltaSink, WorkspaceWatcher};
