//! Registry of saved indexes.
//!
//! Maps each index file name to the project it belongs to, with the state
//! the index was left in. Stored as JSON (`index.meta`) next to the index
//! files so orphaned files and interrupted rebuilds can be detected on the
//! next start.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::error::{StorageError, StorageResult};
use crate::utils::get_utc_timestamp;

pub const REGISTRY_FILE: &str = "index.meta";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    /// Backing file matches the last saved in-memory state.
    Saved,
    /// Jobs have modified the index since the last save.
    Updating,
    /// The index must be rebuilt from scratch (failed save, corrupt file).
    Rebuilding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub project: PathBuf,
    pub state: IndexState,
    pub file_count: u32,
    pub entry_count: u32,
    pub last_saved: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRegistry {
    /// Version of the registry format
    pub version: u32,

    /// Index file name -> entry
    pub indexes: BTreeMap<String, RegistryEntry>,

    /// Last modification timestamp
    pub last_modified: u64,
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self {
            version: 1,
            indexes: BTreeMap::new(),
            last_modified: get_utc_timestamp(),
        }
    }

    pub fn record(&mut self, file_name: &str, project: &Path, state: IndexState) {
        let entry = self
            .indexes
            .entry(file_name.to_string())
            .or_insert_with(|| RegistryEntry {
                project: project.to_path_buf(),
                state,
                file_count: 0,
                entry_count: 0,
                last_saved: None,
            });
        entry.state = state;
        self.last_modified = get_utc_timestamp();
    }

    /// Record a successful save.
    pub fn update_counts(&mut self, file_name: &str, file_count: u32, entry_count: u32, saved_at: u64) {
        if let Some(entry) = self.indexes.get_mut(file_name) {
            entry.state = IndexState::Saved;
            entry.file_count = file_count;
            entry.entry_count = entry_count;
            entry.last_saved = Some(saved_at);
            self.last_modified = get_utc_timestamp();
        }
    }

    pub fn remove(&mut self, file_name: &str) -> Option<RegistryEntry> {
        let removed = self.indexes.remove(file_name);
        if removed.is_some() {
            self.last_modified = get_utc_timestamp();
        }
        removed
    }

    pub fn get(&self, file_name: &str) -> Option<&RegistryEntry> {
        self.indexes.get(file_name)
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.indexes.contains_key(file_name)
    }

    /// Projects whose index was left needing a rebuild.
    pub fn pending_rebuilds(&self) -> Vec<PathBuf> {
        self.indexes
            .values()
            .filter(|e| e.state == IndexState::Rebuilding)
            .map(|e| e.project.clone())
            .collect()
    }

    /// File names of indexes belonging to `prefix` or anything nested under it.
    pub fn family(&self, prefix: &Path) -> Vec<String> {
        self.indexes
            .iter()
            .filter(|(_, e)| e.project.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Save registry to `base_path/index.meta`
    pub fn save(&self, base_path: &Path) -> StorageResult<()> {
        let registry_path = base_path.join(REGISTRY_FILE);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StorageError::Metadata(format!("Failed to serialize registry: {e}")))?;

        fs::write(&registry_path, json).map_err(|e| StorageError::io(&registry_path, e))
    }

    /// Load registry from `base_path/index.meta`; a missing file yields an empty registry.
    pub fn load(base_path: &Path) -> StorageResult<Self> {
        let registry_path = base_path.join(REGISTRY_FILE);

        if !registry_path.exists() {
            return Ok(Self::new());
        }

        let json =
            fs::read_to_string(&registry_path).map_err(|e| StorageError::io(&registry_path, e))?;

        serde_json::from_str(&json)
            .map_err(|e| StorageError::Metadata(format!("Failed to parse registry: {e}")))
    }
}
