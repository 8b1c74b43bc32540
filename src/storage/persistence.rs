//! Project path -> live index handle, backed by one file per project.
//!
//! # Locking
//!
//! Two levels, always taken in this order and never the reverse:
//!
//! 1. `indexes` (outer mutex) guards the map itself. It is held to look up,
//!    insert, or evict a handle, and across the file and registry changes
//!    that go with loading or removing one, but never while waiting on an
//!    index monitor.
//! 2. Each [`IndexHandle`] has its own [`ReadWriteMonitor`] guarding the
//!    index contents.
//!
//! The registry mutex is a leaf lock: nothing else is acquired while it is
//! held.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::{StorageError, StorageResult};
use super::format;
use super::index::Index;
use super::metadata::{IndexRegistry, IndexState};
use crate::monitor::{MonitorReadGuard, MonitorWriteGuard, Monitored, ReadWriteMonitor};
use crate::utils::get_utc_timestamp;

const INDEX_EXTENSION: &str = "index";

/// One live index plus its monitor.
#[derive(Debug)]
pub struct IndexHandle {
    project: PathBuf,
    location: PathBuf,
    file_name: String,
    index: Monitored<Index>,
}

impl IndexHandle {
    fn new(project: PathBuf, location: PathBuf, file_name: String, index: Index) -> Self {
        Self {
            project,
            location,
            file_name,
            index: Monitored::new(index),
        }
    }

    pub fn project(&self) -> &Path {
        &self.project
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn read(&self) -> MonitorReadGuard<'_, Index> {
        self.index.read()
    }

    pub fn write(&self) -> MonitorWriteGuard<'_, Index> {
        self.index.write()
    }

    pub fn monitor(&self) -> &ReadWriteMonitor {
        self.index.monitor()
    }
}

/// Owns every index file under one directory.
#[derive(Debug)]
pub struct IndexStore {
    root: PathBuf,
    indexes: Mutex<HashMap<PathBuf, Arc<IndexHandle>>>,
    registry: Mutex<IndexRegistry>,
    rebuild_requests: Mutex<Vec<PathBuf>>,
}

impl IndexStore {
    /// Open (creating if needed) the index directory.
    ///
    /// Index files the registry does not know are deleted as orphans, and
    /// projects left in `Rebuilding` state are queued for a rebuild.
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StorageError::io(&root, e))?;

        let registry = match IndexRegistry::load(&root) {
            Ok(registry) => registry,
            Err(e) => {
                tracing::warn!(target: "storage", "discarding unreadable index registry: {e}");
                IndexRegistry::new()
            }
        };

        let store = Self {
            root,
            indexes: Mutex::new(HashMap::new()),
            rebuild_requests: Mutex::new(registry.pending_rebuilds()),
            registry: Mutex::new(registry),
        };
        store.clean_orphans();
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Backing file of the index for `project`.
    pub fn index_location(&self, project: &Path) -> PathBuf {
        self.root.join(Self::file_name_for(project))
    }

    fn file_name_for(project: &Path) -> String {
        let digest = Sha256::digest(project.to_string_lossy().as_bytes());
        let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        format!("{hex}.{INDEX_EXTENSION}")
    }

    /// Return the live index for `project`, loading or creating it as allowed.
    ///
    /// `None` when no index exists and creation is not allowed, or when the
    /// backing file fails its integrity checks. A corrupt file is deleted
    /// and the project is queued for a rebuild
    /// (see [`IndexStore::drain_rebuild_requests`]).
    pub fn get_index(
        &self,
        project: &Path,
        reuse_existing_file: bool,
        create_if_missing: bool,
    ) -> Option<Arc<IndexHandle>> {
        let mut indexes = self.indexes.lock();
        if let Some(handle) = indexes.get(project) {
            return Some(Arc::clone(handle));
        }

        let file_name = Self::file_name_for(project);
        let location = self.root.join(&file_name);

        if reuse_existing_file && location.exists() {
            match format::read_index(&location) {
                Ok(index) => {
                    tracing::debug!(
                        target: "storage",
                        "loaded index for {}: {} files, {} entries",
                        project.display(),
                        index.file_count(),
                        index.entry_count()
                    );
                    let handle = Arc::new(IndexHandle::new(
                        project.to_path_buf(),
                        location,
                        file_name.clone(),
                        index,
                    ));
                    indexes.insert(project.to_path_buf(), Arc::clone(&handle));
                    drop(indexes);
                    self.update_registry(|r| {
                        if !r.contains(&file_name) {
                            r.record(&file_name, project, IndexState::Saved);
                        }
                    });
                    return Some(handle);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "storage",
                        "index for {} unusable, discarding: {e}",
                        project.display()
                    );
                    let _ = fs::remove_file(&location);
                    drop(indexes);
                    self.update_registry(|r| r.record(&file_name, project, IndexState::Rebuilding));
                    self.request_rebuild(project);
                    return None;
                }
            }
        }

        if !create_if_missing {
            return None;
        }

        let mut index = Index::new();
        index.mark_dirty();
        let handle = Arc::new(IndexHandle::new(
            project.to_path_buf(),
            location,
            file_name.clone(),
            index,
        ));
        indexes.insert(project.to_path_buf(), Arc::clone(&handle));
        drop(indexes);
        self.update_registry(|r| r.record(&file_name, project, IndexState::Updating));
        tracing::debug!(target: "storage", "created index for {}", project.display());
        Some(handle)
    }

    /// Flush `handle` to disk if it has pending changes.
    ///
    /// Takes the write side of the index monitor, so readers see either the
    /// state before or after the save. On I/O failure the in-memory index
    /// stays usable and is flagged for a full rebuild.
    pub fn save_index(&self, handle: &IndexHandle) -> StorageResult<()> {
        let mut index = handle.write();
        if index.is_dropped() {
            return Err(StorageError::Dropped(handle.project.clone()));
        }
        if !index.is_dirty() {
            return Ok(());
        }

        match format::write_index(&index, &handle.location) {
            Ok(()) => {
                let now = get_utc_timestamp();
                index.mark_saved(now);
                let (files, entries) = (index.file_count() as u32, index.entry_count() as u32);
                drop(index);
                self.update_registry(|r| {
                    r.record(&handle.file_name, &handle.project, IndexState::Saved);
                    r.update_counts(&handle.file_name, files, entries, now);
                });
                crate::debug_event!(
                    "storage",
                    "saved",
                    "{} ({files} files, {entries} entries)",
                    handle.project.display()
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    target: "storage",
                    "failed to save index for {}: {e}",
                    handle.project.display()
                );
                index.mark_needs_rebuild();
                drop(index);
                self.update_registry(|r| {
                    r.record(&handle.file_name, &handle.project, IndexState::Rebuilding)
                });
                Err(e)
            }
        }
    }

    /// Save every loaded index with pending changes. Returns how many were saved.
    pub fn save_indexes(&self) -> usize {
        let handles: Vec<Arc<IndexHandle>> = self.indexes.lock().values().cloned().collect();
        handles
            .iter()
            .filter(|h| h.read().is_dirty())
            .filter(|h| self.save_index(h).is_ok())
            .count()
    }

    /// True when a loaded index failed its last save and still holds the
    /// only up-to-date copy of its contents.
    pub fn has_failed_saves(&self) -> bool {
        let handles: Vec<Arc<IndexHandle>> = self.indexes.lock().values().cloned().collect();
        handles.iter().any(|h| {
            let index = h.read();
            index.needs_rebuild() && !index.is_dropped()
        })
    }

    /// True when any loaded index has unsaved changes.
    pub fn needs_save(&self) -> bool {
        let handles: Vec<Arc<IndexHandle>> = self.indexes.lock().values().cloned().collect();
        handles.iter().any(|h| h.read().is_dirty())
    }

    /// Mark the index for `project` as being updated by jobs.
    pub fn mark_updating(&self, project: &Path) {
        let file_name = Self::file_name_for(project);
        self.update_registry(|r| r.record(&file_name, project, IndexState::Updating));
    }

    /// Drop the live handle and delete the backing file for `project`.
    ///
    /// The file and registry entry go away before the map lock is released,
    /// so a concurrent [`get_index`](Self::get_index) either sees the old
    /// handle or finds nothing to reload.
    pub fn remove_index(&self, project: &Path) {
        let file_name = Self::file_name_for(project);
        let removed = {
            let mut indexes = self.indexes.lock();
            let removed = indexes.remove(project);

            let location = self.root.join(&file_name);
            if location.exists() {
                if let Err(e) = fs::remove_file(&location) {
                    tracing::warn!(target: "storage", "failed to delete {}: {e}", location.display());
                }
            }
            self.update_registry(|r| {
                r.remove(&file_name);
            });
            self.rebuild_requests.lock().retain(|p| p != project);
            removed
        };

        if let Some(handle) = removed {
            // Wait for in-flight readers before invalidating.
            handle.write().mark_dropped();
        }
        crate::debug_event!("storage", "removed", "{}", project.display());
    }

    /// Remove the indexes of `prefix` and every project nested under it.
    pub fn remove_index_family(&self, prefix: &Path) {
        let mut projects: Vec<PathBuf> = self
            .indexes
            .lock()
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect();

        {
            let registry = self.registry.lock();
            for name in registry.family(prefix) {
                if let Some(entry) = registry.get(&name) {
                    if !projects.contains(&entry.project) {
                        projects.push(entry.project.clone());
                    }
                }
            }
        }

        for project in projects {
            self.remove_index(&project);
        }
    }

    /// Projects currently loaded in memory.
    pub fn loaded_projects(&self) -> Vec<PathBuf> {
        self.indexes.lock().keys().cloned().collect()
    }

    pub fn request_rebuild(&self, project: &Path) {
        let mut requests = self.rebuild_requests.lock();
        if !requests.iter().any(|p| p == project) {
            requests.push(project.to_path_buf());
        }
    }

    /// Take the projects whose index must be rebuilt from scratch.
    pub fn drain_rebuild_requests(&self) -> Vec<PathBuf> {
        std::mem::take(&mut *self.rebuild_requests.lock())
    }

    fn update_registry(&self, update: impl FnOnce(&mut IndexRegistry)) {
        let mut registry = self.registry.lock();
        update(&mut registry);
        if let Err(e) = registry.save(&self.root) {
            tracing::warn!(target: "storage", "failed to save index registry: {e}");
        }
    }

    fn clean_orphans(&self) {
        let Ok(dir) = fs::read_dir(&self.root) else {
            return;
        };
        let registry = self.registry.lock();
        for entry in dir.flatten() {
            let path = entry.path();
            let is_index = path.extension().and_then(|e| e.to_str()) == Some(INDEX_EXTENSION);
            let is_tmp = path.extension().and_then(|e| e.to_str()) == Some("tmp");
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if is_tmp || (is_index && !registry.contains(name)) {
                tracing::info!(target: "storage", "removing orphaned {}", path.display());
                let _ = fs::remove_file(&path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryType, IndexEntry, IndexFlag, LimitTo, QualifiedName};
    use tempfile::TempDir;

    fn populate(handle: &IndexHandle) {
        let mut index = handle.write();
        let id = index.add_indexed_file(Path::new("/proj/a.cpp")).unwrap();
        index
            .add_ref(
                IndexEntry::new(QualifiedName::parse("A"), EntryType::Class, LimitTo::Declaration),
                IndexFlag::new(id),
            )
            .unwrap();
    }

    #[test]
    fn test_get_index_respects_flags() {
        let temp_dir = TempDir::new().unwrap();
        let store = IndexStore::open(temp_dir.path()).unwrap();
        let project = Path::new("/proj");

        assert!(store.get_index(project, true, false).is_none());
        let created = store.get_index(project, true, true).unwrap();
        let again = store.get_index(project, true, false).unwrap();
        assert!(Arc::ptr_eq(&created, &again));
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let project = Path::new("/proj");
        {
            let store = IndexStore::open(temp_dir.path()).unwrap();
            let handle = store.get_index(project, true, true).unwrap();
            populate(&handle);
            store.save_index(&handle).unwrap();
            assert!(!handle.read().is_dirty());
        }

        let store = IndexStore::open(temp_dir.path()).unwrap();
        let handle = store.get_index(project, true, false).unwrap();
        assert_eq!(handle.read().entry_count(), 1);
    }

    #[test]
    fn test_corrupt_file_requests_rebuild() {
        let temp_dir = TempDir::new().unwrap();
        let project = Path::new("/proj");
        let location = {
            let store = IndexStore::open(temp_dir.path()).unwrap();
            let handle = store.get_index(project, true, true).unwrap();
            populate(&handle);
            store.save_index(&handle).unwrap();
            handle.location().to_path_buf()
        };
        fs::write(&location, b"CCIX garbage").unwrap();

        let store = IndexStore::open(temp_dir.path()).unwrap();
        assert!(store.get_index(project, true, true).is_none());
        assert!(!location.exists());
        assert_eq!(store.drain_rebuild_requests(), vec![project.to_path_buf()]);

        // The next request starts from an empty index.
        let fresh = store.get_index(project, true, true).unwrap();
        assert_eq!(fresh.read().entry_count(), 0);
    }

    #[test]
    fn test_corrupt_file_requests_rebuild_on_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let project = Path::new("/proj");
        let location = {
            let store = IndexStore::open(temp_dir.path()).unwrap();
            let handle = store.get_index(project, true, true).unwrap();
            populate(&handle);
            store.save_index(&handle).unwrap();
            handle.location().to_path_buf()
        };
        fs::write(&location, b"CCIX garbage").unwrap();

        let store = IndexStore::open(temp_dir.path()).unwrap();
        assert!(store.get_index(project, true, false).is_none());
        assert!(!location.exists());
        assert_eq!(store.drain_rebuild_requests(), vec![project.to_path_buf()]);

        let registry = IndexRegistry::load(temp_dir.path()).unwrap();
        assert_eq!(registry.pending_rebuilds(), vec![project.to_path_buf()]);
    }

    #[test]
    fn test_failed_save_keeps_index_queryable() {
        let temp_dir = TempDir::new().unwrap();
        let store = IndexStore::open(temp_dir.path()).unwrap();
        let project = Path::new("/proj");
        let handle = store.get_index(project, true, true).unwrap();
        populate(&handle);

        fs::create_dir_all(handle.location().join("blocker")).unwrap();
        assert!(store.save_index(&handle).is_err());

        let index = handle.read();
        assert_eq!(index.entry_count(), 1);
        assert!(index.needs_rebuild());
        assert!(index.is_dirty());
        drop(index);

        let registry = IndexRegistry::load(temp_dir.path()).unwrap();
        assert_eq!(registry.pending_rebuilds(), vec![project.to_path_buf()]);
    }

    #[test]
    fn test_remove_index_family() {
        let temp_dir = TempDir::new().unwrap();
        let store = IndexStore::open(temp_dir.path()).unwrap();
        for project in ["/ws/app", "/ws/app/sub", "/ws/other"] {
            let handle = store.get_index(Path::new(project), true, true).unwrap();
            store.save_index(&handle).unwrap();
        }

        store.remove_index_family(Path::new("/ws/app"));

        assert_eq!(store.loaded_projects(), vec![PathBuf::from("/ws/other")]);
        assert!(!store.index_location(Path::new("/ws/app")).exists());
        assert!(!store.index_location(Path::new("/ws/app/sub")).exists());
        assert!(store.index_location(Path::new("/ws/other")).exists());
    }

    #[test]
    fn test_removed_handle_is_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let store = IndexStore::open(temp_dir.path()).unwrap();
        let handle = store.get_index(Path::new("/proj"), true, true).unwrap();
        store.remove_index(Path::new("/proj"));
        assert!(handle.read().is_dropped());
        assert!(matches!(
            store.save_index(&handle),
            Err(StorageError::Dropped(_))
        ));
    }

    #[test]
    fn test_removed_index_is_not_reloaded_while_readers_finish() {
        let temp_dir = TempDir::new().unwrap();
        let store = IndexStore::open(temp_dir.path()).unwrap();
        let project = Path::new("/proj");
        let handle = store.get_index(project, true, true).unwrap();
        populate(&handle);
        store.save_index(&handle).unwrap();
        let location = handle.location().to_path_buf();

        let reader = handle.read();
        std::thread::scope(|s| {
            let remover = s.spawn(|| store.remove_index(project));

            let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
            while location.exists() && std::time::Instant::now() < deadline {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            assert!(!location.exists());

            // The remover is still blocked on the reader; nothing may come back.
            assert!(store.get_index(project, true, false).is_none());
            assert!(store.loaded_projects().is_empty());

            drop(reader);
            remover.join().unwrap();
        });

        assert!(handle.read().is_dropped());
        assert!(store.get_index(project, true, false).is_none());
    }

    #[test]
    fn test_failed_save_is_reported_until_retried() {
        let temp_dir = TempDir::new().unwrap();
        let store = IndexStore::open(temp_dir.path()).unwrap();
        let handle = store.get_index(Path::new("/proj"), true, true).unwrap();
        populate(&handle);

        let blocker = handle.location().to_path_buf();
        fs::create_dir_all(blocker.join("blocker")).unwrap();
        assert_eq!(store.save_indexes(), 0);
        assert!(store.has_failed_saves());

        fs::remove_dir_all(&blocker).unwrap();
        assert_eq!(store.save_indexes(), 1);
        assert!(!store.has_failed_saves());
        assert!(blocker.is_file());
    }

    #[test]
    fn test_orphaned_files_are_removed_on_open() {
        let temp_dir = TempDir::new().unwrap();
        let orphan = temp_dir.path().join("deadbeef.index");
        fs::write(&orphan, b"whatever").unwrap();

        let _store = IndexStore::open(temp_dir.path()).unwrap();
        assert!(!orphan.exists());
    }
}
