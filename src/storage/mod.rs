//! Persistent symbol store.
//!
//! One binary file per project index, one in-memory [`Index`] per loaded
//! project, each behind its own reader/writer monitor.

pub mod error;
pub mod format;
pub mod index;
pub mod metadata;
pub mod persistence;

pub use error::{StorageError, StorageResult};
pub use index::{EntryMatch, EntryQuery, Index, NamePattern, QueryResult, StoredEntry};
pub use metadata::{IndexRegistry, IndexState, RegistryEntry};
pub use persistence::{IndexHandle, IndexStore};
