//! In-memory image of one project index.
//!
//! Holds the interned file table and the per-file entry logs. All access goes
//! through the per-index monitor (see [`crate::storage::IndexHandle`]); the
//! type itself does no locking.

use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::error::{StorageError, StorageResult};
use crate::types::{EntryType, FileId, IndexEntry, IndexFlag, IndexedFile, LimitTo, QualifiedName};

/// One entry as stored: the fact plus its file attribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoredEntry {
    pub entry: IndexEntry,
    pub flag: IndexFlag,
}

/// Result row of [`Index::query_in_document_names`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub path: PathBuf,
    pub file_id: FileId,
    pub stamp: Option<u64>,
}

/// Result row of [`Index::query_entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMatch {
    pub entry: IndexEntry,
    pub flag: IndexFlag,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NamePattern {
    #[default]
    Any,
    Exact(QualifiedName),
    /// Segment-wise prefix, e.g. everything inside a namespace.
    Prefix(QualifiedName),
    /// Matches on the last segment only.
    Simple(String),
}

impl NamePattern {
    fn matches(&self, name: &QualifiedName) -> bool {
        match self {
            NamePattern::Any => true,
            NamePattern::Exact(expected) => name == expected,
            NamePattern::Prefix(prefix) => name.starts_with(prefix),
            NamePattern::Simple(simple) => name.last() == Some(simple.as_str()),
        }
    }
}

/// Filter for [`Index::query_entries`]. Empty `types` means any type.
#[derive(Debug, Clone, Default)]
pub struct EntryQuery {
    pub name: NamePattern,
    pub types: Vec<EntryType>,
    pub limit_to: Option<LimitTo>,
}

impl EntryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: NamePattern::Exact(QualifiedName::parse(name)),
            ..Self::default()
        }
    }

    pub fn with_pattern(mut self, pattern: NamePattern) -> Self {
        self.name = pattern;
        self
    }

    pub fn with_type(mut self, entry_type: EntryType) -> Self {
        self.types.push(entry_type);
        self
    }

    pub fn with_limit_to(mut self, limit_to: LimitTo) -> Self {
        self.limit_to = Some(limit_to);
        self
    }

    fn matches(&self, entry: &IndexEntry) -> bool {
        (self.types.is_empty() || self.types.contains(&entry.entry_type))
            && self.limit_to.is_none_or(|l| l == entry.limit_to)
            && self.name.matches(&entry.name)
    }
}

#[derive(Debug)]
pub struct Index {
    files: IndexMap<PathBuf, IndexedFile>,
    paths_by_id: BTreeMap<FileId, PathBuf>,
    entries: BTreeMap<FileId, IndexSet<StoredEntry>>,
    next_file_id: u32,
    dirty: bool,
    needs_rebuild: bool,
    dropped: bool,
    last_saved: Option<u64>,
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}

impl Index {
    pub fn new() -> Self {
        Self {
            files: IndexMap::new(),
            paths_by_id: BTreeMap::new(),
            entries: BTreeMap::new(),
            next_file_id: 1,
            dirty: false,
            needs_rebuild: false,
            dropped: false,
            last_saved: None,
        }
    }

    // =========================================================================
    // File table
    // =========================================================================

    pub fn get_indexed_file(&self, path: &Path) -> Option<&IndexedFile> {
        self.files.get(path)
    }

    pub fn file_by_id(&self, file_id: FileId) -> Option<&IndexedFile> {
        self.paths_by_id.get(&file_id).and_then(|p| self.files.get(p))
    }

    /// Intern `path`; repeated calls return the same id.
    pub fn add_indexed_file(&mut self, path: &Path) -> StorageResult<FileId> {
        if let Some(existing) = self.files.get(path) {
            return Ok(existing.file_id);
        }

        let file_id = FileId::new(self.next_file_id).ok_or(StorageError::FileIdOverflow)?;
        self.next_file_id = self
            .next_file_id
            .checked_add(1)
            .ok_or(StorageError::FileIdOverflow)?;

        self.files.insert(
            path.to_path_buf(),
            IndexedFile {
                file_id,
                path: path.to_path_buf(),
                stamp: None,
            },
        );
        self.paths_by_id.insert(file_id, path.to_path_buf());
        self.dirty = true;
        Ok(file_id)
    }

    pub fn set_file_stamp(&mut self, file_id: FileId, stamp: Option<u64>) {
        if let Some(path) = self.paths_by_id.get(&file_id) {
            if let Some(file) = self.files.get_mut(path) {
                if file.stamp != stamp {
                    file.stamp = stamp;
                    self.dirty = true;
                }
            }
        }
    }

    /// Remove a file and every entry attributed to it. The id is not reused.
    pub fn remove_file(&mut self, path: &Path) -> bool {
        let Some(file) = self.files.shift_remove(path) else {
            return false;
        };
        self.paths_by_id.remove(&file.file_id);
        self.entries.remove(&file.file_id);
        self.dirty = true;
        true
    }

    /// Remove every file under `prefix` (component-wise). Returns the count.
    pub fn remove_files_under(&mut self, prefix: &Path) -> usize {
        let doomed: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect();
        for path in &doomed {
            self.remove_file(path);
        }
        doomed.len()
    }

    /// All files whose path starts with `prefix`; an empty prefix lists every file.
    pub fn query_in_document_names(&self, prefix: &Path) -> Vec<QueryResult> {
        self.files
            .values()
            .filter(|f| f.path.starts_with(prefix))
            .map(|f| QueryResult {
                path: f.path.clone(),
                file_id: f.file_id,
                stamp: f.stamp,
            })
            .collect()
    }

    pub fn files(&self) -> impl Iterator<Item = &IndexedFile> {
        self.files.values()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    // =========================================================================
    // Entries
    // =========================================================================

    /// Append one symbol fact under `flag`. Identical facts are stored once.
    pub fn add_ref(&mut self, entry: IndexEntry, flag: IndexFlag) -> StorageResult<()> {
        if !self.paths_by_id.contains_key(&flag.file_id) {
            return Err(StorageError::UnknownFile(flag.file_id.value()));
        }
        let inserted = self
            .entries
            .entry(flag.file_id)
            .or_default()
            .insert(StoredEntry { entry, flag });
        if inserted {
            self.dirty = true;
        }
        Ok(())
    }

    /// Drop the entries attributed to `file_id`, keeping the file itself.
    pub fn clear_file_entries(&mut self, file_id: FileId) {
        if self.entries.remove(&file_id).is_some() {
            self.dirty = true;
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.values().map(IndexSet::len).sum()
    }

    pub fn stored_entries(&self) -> impl Iterator<Item = &StoredEntry> {
        self.entries.values().flat_map(|set| set.iter())
    }

    pub fn query_entries(&self, query: &EntryQuery) -> Vec<EntryMatch> {
        self.entries
            .iter()
            .filter_map(|(file_id, set)| self.paths_by_id.get(file_id).map(|p| (p, set)))
            .flat_map(|(path, set)| {
                set.iter()
                    .filter(|stored| query.matches(&stored.entry))
                    .map(move |stored| EntryMatch {
                        entry: stored.entry.clone(),
                        flag: stored.flag,
                        path: path.clone(),
                    })
            })
            .collect()
    }

    pub fn entries_in_file(&self, path: &Path) -> Vec<IndexEntry> {
        self.files
            .get(path)
            .and_then(|f| self.entries.get(&f.file_id))
            .map(|set| set.iter().map(|s| s.entry.clone()).collect())
            .unwrap_or_default()
    }

    /// Classes recorded as deriving from `base`.
    pub fn derived_classes(&self, base: &QualifiedName) -> Vec<QualifiedName> {
        self.related_by(EntryType::Derived, |entry| &entry.name == base)
    }

    /// Classes `class` was declared a friend of.
    pub fn befriended_by(&self, class: &QualifiedName) -> Vec<QualifiedName> {
        self.related_by(EntryType::Friend, |entry| &entry.name == class)
    }

    /// Friends declared inside `class`.
    pub fn friends_of(&self, class: &QualifiedName) -> Vec<QualifiedName> {
        let mut friends: Vec<QualifiedName> = self
            .stored_entries()
            .filter(|s| s.entry.entry_type == EntryType::Friend)
            .filter(|s| s.entry.related.as_ref() == Some(class))
            .map(|s| s.entry.name.clone())
            .collect();
        friends.sort();
        friends.dedup();
        friends
    }

    fn related_by(
        &self,
        entry_type: EntryType,
        key: impl Fn(&IndexEntry) -> bool,
    ) -> Vec<QualifiedName> {
        let mut related: Vec<QualifiedName> = self
            .stored_entries()
            .filter(|s| s.entry.entry_type == entry_type && key(&s.entry))
            .filter_map(|s| s.entry.related.clone())
            .collect();
        related.sort();
        related.dedup();
        related
    }

    // =========================================================================
    // Save state
    // =========================================================================

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_saved(&mut self, timestamp: u64) {
        self.dirty = false;
        self.needs_rebuild = false;
        self.last_saved = Some(timestamp);
    }

    pub fn last_saved(&self) -> Option<u64> {
        self.last_saved
    }

    /// Set when the backing file could not be written; the next load rebuilds.
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    pub fn mark_needs_rebuild(&mut self) {
        self.needs_rebuild = true;
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    pub fn mark_dropped(&mut self) {
        self.dropped = true;
    }

    pub(crate) fn next_file_id(&self) -> u32 {
        self.next_file_id
    }

    /// Rebuild from decoded parts. Used by the on-disk codec.
    pub(crate) fn from_parts(
        files: Vec<IndexedFile>,
        entries: Vec<StoredEntry>,
        next_file_id: u32,
        last_saved: Option<u64>,
    ) -> StorageResult<Self> {
        let mut index = Self::new();
        for file in files {
            if file.file_id.value() >= next_file_id {
                return Err(StorageError::Metadata(format!(
                    "file id {} not below next id {next_file_id}",
                    file.file_id
                )));
            }
            index.paths_by_id.insert(file.file_id, file.path.clone());
            index.files.insert(file.path.clone(), file);
        }
        for stored in entries {
            index.add_ref(stored.entry, stored.flag)?;
        }
        index.next_file_id = next_file_id;
        index.last_saved = last_saved;
        index.dirty = false;
        Ok(index)
    }
}
