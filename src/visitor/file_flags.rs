//! File attribution for name occurrences.
//!
//! A translation unit's names physically live in the main file and in every
//! header it pulls in. [`FileFlagResolver`] maps each occurrence's location to
//! the [`IndexFlag`] of the file it belongs to, interning new files on the
//! way. One resolver lives for one indexing session (one translation unit)
//! and carries all per-session state: the main file, the one-entry lookup
//! cache, and the set of files already cleared this session.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::ast::FileLocation;
use crate::headers::HeaderTracker;
use crate::indexing::workspace::Workspace;
use crate::storage::{Index, StorageResult};
use crate::types::{FileId, IndexFlag};
use crate::utils::{file_stamp, normalize_path};

pub struct FileFlagResolver<'a> {
    workspace: &'a Workspace,
    headers: &'a HeaderTracker,
    project: &'a Path,
    check_encountered: bool,
    main_path: PathBuf,
    main_flag: IndexFlag,
    /// Last resolved location path and its flag; `None` means "skip".
    cache: Option<(PathBuf, Option<IndexFlag>)>,
    /// Files whose previous entries were cleared in this session.
    touched: HashSet<FileId>,
    /// Headers this session claimed in the tracker.
    claimed: HashSet<PathBuf>,
}

impl<'a> FileFlagResolver<'a> {
    /// Start a session for `main_file`, interning it first and dropping the
    /// entries a previous run attributed to it.
    pub fn new(
        workspace: &'a Workspace,
        headers: &'a HeaderTracker,
        project: &'a Path,
        main_file: &Path,
        index: &mut Index,
    ) -> StorageResult<Self> {
        let main_path = normalize_path(main_file);
        let file_id = index.add_indexed_file(&workspace.index_path(&main_path))?;
        index.clear_file_entries(file_id);
        index.set_file_stamp(file_id, file_stamp(&main_path));

        let main_flag = IndexFlag::new(file_id).with_external(!workspace.is_local(&main_path));
        let mut touched = HashSet::new();
        touched.insert(file_id);

        Ok(Self {
            workspace,
            headers,
            project,
            check_encountered: true,
            main_path,
            main_flag,
            cache: None,
            touched,
            claimed: HashSet::new(),
        })
    }

    /// Whether external headers seen by an earlier translation unit are skipped.
    pub fn with_header_check(mut self, enabled: bool) -> Self {
        self.check_encountered = enabled;
        self
    }

    pub fn main_file_id(&self) -> FileId {
        self.main_flag.file_id
    }

    pub fn touched_files(&self) -> usize {
        self.touched.len()
    }

    /// Flag for an occurrence at `location`, or `None` when the occurrence
    /// belongs to a header that must not be re-indexed.
    pub fn resolve(
        &mut self,
        location: Option<&FileLocation>,
        index: &mut Index,
    ) -> StorageResult<Option<IndexFlag>> {
        let Some(location) = location else {
            return Ok(Some(self.main_flag));
        };

        if let Some((path, flag)) = &self.cache {
            if *path == location.path {
                return Ok(*flag);
            }
        }

        let flag = self.compute(&location.path, index)?;
        self.cache = Some((location.path.clone(), flag));
        Ok(flag)
    }

    fn compute(&mut self, raw: &Path, index: &mut Index) -> StorageResult<Option<IndexFlag>> {
        let path = normalize_path(raw);
        if path == self.main_path {
            return Ok(Some(self.main_flag));
        }

        let external = !self.workspace.is_local(&path);
        let mut visited = false;
        if !self.claimed.contains(&path) {
            visited = self.headers.have_encountered(self.project, &path, true);
            if visited && external && self.check_encountered {
                tracing::trace!(target: "indexer", "skipping encountered header {}", path.display());
                return Ok(None);
            }
            self.claimed.insert(path.clone());
        }

        let file_id = index.add_indexed_file(&self.workspace.index_path(&path))?;
        if self.touched.insert(file_id) {
            index.clear_file_entries(file_id);
            index.set_file_stamp(file_id, file_stamp(&path));
        }

        Ok(Some(
            IndexFlag::new(file_id)
                .with_external(external)
                .with_visited_header(visited),
        ))
    }
}
