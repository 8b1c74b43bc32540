pub mod ast;
pub mod config;
pub mod error;
pub mod headers;
pub mod indexing;
pub mod jobs;
pub mod logging;
pub mod monitor;
pub mod parsing;
pub mod storage;
pub mod types;
pub mod utils;
pub mod visitor;
pub mod watcher;

pub use ast::{Binding, TranslationUnit};
pub use config::Settings;
pub use error::{IndexError, IndexResult};
pub use headers::HeaderTracker;
pub use indexing::{
    DeltaKind, IndexChangeListener, IndexDelta, IndexDeltaKind, ResourceDelta, ResourceKind,
    SourceIndexer, Workspace,
};
pub use jobs::{Job, JobQueue, WorkerState};
pub use monitor::Monitored;
pub use parsing::{CppParser, TranslationUnitParser};
pub use storage::{EntryMatch, EntryQuery, IndexStore, NamePattern, QueryResult};
pub use types::*;
pub use watcher::WorkspaceWatcher;
