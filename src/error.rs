//! Crate-level error type.
//!
//! Layer errors (`StorageError`, `ParseError`, `WatchError`) convert into
//! `IndexError` with `?`. Job bodies never let these escape the worker;
//! they are logged at the job boundary instead.

use std::path::PathBuf;
use thiserror::Error;

use crate::parsing::ParseError;
use crate::storage::StorageError;
use crate::watcher::WatchError;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Watcher error: {0}")]
    Watch(#[from] WatchError),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Project not found: {0}")]
    ProjectNotFound(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Indexer has been shut down")]
    ShutDown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;
