//! SourceIndexer - the single entry point for hosts.
//!
//! Translates high-level events (a file was saved, a project was opened, a
//! folder was deleted) into jobs for the background worker, brokers change
//! notifications, and answers queries against the saved indexes.
//!
//! ## Architecture
//!
//! ```text
//! SourceIndexer
//!   ├── JobQueue - single worker, all index mutation
//!   └── IndexerCore (Arc, shared with the worker)
//!         ├── IndexStore - project -> index handle, per-index monitor
//!         ├── HeaderTracker - headers already indexed per project
//!         ├── TranslationUnitParser - AST provider
//!         └── Notifier - listener delivery thread
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let indexer = SourceIndexer::with_cpp_parser(&settings)?;
//! indexer.start()?;
//! indexer.index_all(Path::new("/ws/app"));
//! indexer.wait_until_idle(Duration::from_secs(30));
//! let classes = indexer.query_entries(Path::new("/ws/app"), &EntryQuery::new().with_type(EntryType::Class));
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::notify::{IndexChangeListener, IndexDelta, IndexDeltaKind, Notifier};
use super::requests::{IndexerCore, IndexingStats};
use super::workspace::Workspace;
use super::{DeltaKind, ResourceDelta, ResourceKind};
use crate::config::Settings;
use crate::error::{IndexError, IndexResult};
use crate::jobs::{Job, JobQueue, QueueConfig, WorkerState};
use crate::parsing::{CppParser, TranslationUnitParser};
use crate::storage::{EntryMatch, EntryQuery, IndexStore, QueryResult};
use crate::types::{IndexEntry, QualifiedName};
use crate::utils::normalize_path;

pub struct SourceIndexer {
    core: Arc<IndexerCore>,
    jobs: JobQueue,
}

impl SourceIndexer {
    /// Open the index directory and set up the worker (not yet running).
    pub fn new(settings: &Settings, parser: Box<dyn TranslationUnitParser>) -> IndexResult<Self> {
        let root = settings
            .workspace_root
            .clone()
            .ok_or_else(|| IndexError::Config("workspace_root is not set".to_string()))?;
        let workspace = Workspace::new(root);
        let store = IndexStore::open(settings.resolved_index_path())?;
        let notifier = Notifier::new()?;

        let core = Arc::new(IndexerCore::new(
            settings.indexing.clone(),
            workspace,
            store,
            parser,
            notifier,
        ));
        let jobs = JobQueue::new(QueueConfig::from(&settings.indexing));

        crate::log_event!(
            "indexer",
            "opened",
            "workspace {} (index at {})",
            core.workspace.root().display(),
            core.store.root().display()
        );
        Ok(Self { core, jobs })
    }

    /// [`SourceIndexer::new`] with the built-in tree-sitter C/C++ provider.
    pub fn with_cpp_parser(settings: &Settings) -> IndexResult<Self> {
        Self::new(settings, Box::new(CppParser::new()))
    }

    /// Start the worker and queue rebuilds for indexes left unusable by an
    /// earlier run.
    pub fn start(&self) -> IndexResult<()> {
        let executor: Arc<IndexerCore> = Arc::clone(&self.core);
        self.jobs.start(executor)?;
        for project in self.core.store.drain_rebuild_requests() {
            tracing::info!(target: "indexer", "rebuilding index for {}", project.display());
            self.index_all(&project);
        }
        Ok(())
    }

    pub fn workspace(&self) -> &Workspace {
        &self.core.workspace
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Schedule one file for indexing.
    ///
    /// Returns `false` when nothing was queued: the file is not a C/C++
    /// file, its project is disabled, it is outside every project, it is a
    /// header already indexed for its project (with
    /// `check_encountered_headers`), or an equal job is already pending.
    ///
    /// While the backlog is short the contents are read now, so a file
    /// deleted or rewritten before the job runs is indexed as it was.
    /// A paused worker stays paused.
    pub fn add_source(&self, path: &Path, check_encountered_headers: bool) -> bool {
        let path = normalize_path(path);
        let Some(project) = self.eligible_project(&path) else {
            return false;
        };

        if check_encountered_headers
            && self.core.config.is_header(&path)
            && self.core.headers.have_encountered(&project, &path, false)
        {
            tracing::trace!(target: "indexer", "skipping encountered header {}", path.display());
            return false;
        }

        let contents = if self.jobs.pending_count() < self.core.config.preload_backlog_limit {
            match std::fs::read_to_string(&path) {
                Ok(text) => Some(Arc::from(text)),
                Err(e) => {
                    tracing::debug!(target: "indexer", "not preloading {}: {e}", path.display());
                    None
                }
            }
        } else {
            None
        };

        self.jobs.request(Job::AddFile {
            project,
            path,
            contents,
            check_headers: check_encountered_headers,
        })
    }

    /// Schedule a file with contents supplied by the host (an unsaved
    /// editor buffer, for instance).
    pub fn update_source(&self, path: &Path, contents: impl Into<Arc<str>>) -> bool {
        let path = normalize_path(path);
        let Some(project) = self.eligible_project(&path) else {
            return false;
        };
        let job = Job::AddFile {
            project,
            path,
            contents: Some(contents.into()),
            check_headers: false,
        };
        // newer contents replace a pending request for the same file
        self.jobs.discard_matching(&job);
        self.jobs.request(job)
    }

    /// Bring a whole project up to date. Resumes a paused worker.
    pub fn index_all(&self, project: &Path) -> bool {
        let project = normalize_path(project);
        if !self.core.config.is_project_enabled(&project) {
            return false;
        }
        if self.jobs.state() == WorkerState::Waiting {
            self.jobs.resume();
        }
        let job = Job::index_all(&project);
        if self.jobs.is_pending(&job) {
            return false;
        }
        self.jobs.request(job)
    }

    /// Queue an index-all for every project in the workspace.
    pub fn index_workspace(&self) -> IndexResult<usize> {
        let projects = self.core.workspace.projects()?;
        Ok(projects.iter().filter(|project| self.index_all(project)).count())
    }

    /// Map an added or changed resource to the matching request.
    pub fn add_request(&self, project: &Path, path: &Path, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::Project => self.index_all(project),
            ResourceKind::Folder => {
                if !self.core.config.is_project_enabled(project) {
                    return false;
                }
                self.jobs.request(Job::AddFolder {
                    project: normalize_path(project),
                    folder: normalize_path(path),
                })
            }
            ResourceKind::CompilationUnit => self.add_source(path, false),
        }
    }

    /// Map a removed resource to the matching request.
    pub fn remove_request(&self, project: &Path, path: &Path, kind: ResourceKind) -> bool {
        let project = normalize_path(project);
        match kind {
            ResourceKind::Project => {
                self.remove_index(&project);
                true
            }
            ResourceKind::Folder => self.jobs.request(Job::RemoveFolder {
                project,
                folder: normalize_path(path),
            }),
            ResourceKind::CompilationUnit => self.jobs.request(Job::RemoveFile {
                project,
                path: normalize_path(path),
            }),
        }
    }

    pub fn handle_delta(&self, delta: &ResourceDelta) -> bool {
        match delta.change {
            DeltaKind::Added | DeltaKind::Changed => {
                self.add_request(&delta.project, &delta.path, delta.kind)
            }
            DeltaKind::Removed => self.remove_request(&delta.project, &delta.path, delta.kind),
        }
    }

    /// Drop a project's index and every job still queued for it.
    pub fn remove_index(&self, project: &Path) {
        let project = normalize_path(project);
        self.jobs.discard_jobs(&project);
        self.core.store.remove_index(&project);
        self.core.headers.clean_encountered_headers(&project);
        self.core
            .notifier
            .notify(IndexDelta::new(&project, IndexDeltaKind::IndexRemoved));
        crate::log_event!("indexer", "index removed", "{}", project.display());
    }

    /// Queue a save of every dirty index.
    pub fn save(&self) -> bool {
        self.jobs.request(Job::Save { project: None })
    }

    /// Save every dirty index on the calling thread. Returns how many were saved.
    pub fn save_now(&self) -> usize {
        self.core.store.save_indexes()
    }

    /// Save dirty indexes if the worker has been idle for at least the
    /// configured threshold. The worker calls this on its own while idle.
    pub fn notify_idle(&self, idle_for: Duration) {
        self.core.notify_idle(idle_for, &self.jobs);
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    pub fn add_index_change_listener(&self, listener: Arc<dyn IndexChangeListener>) {
        self.core.notifier.add_listener(listener);
    }

    pub fn remove_index_change_listener(&self, listener: &Arc<dyn IndexChangeListener>) -> bool {
        self.core.notifier.remove_listener(listener)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn query_entries(&self, project: &Path, query: &EntryQuery) -> Vec<EntryMatch> {
        self.with_index(project, |index| index.query_entries(query))
            .unwrap_or_default()
    }

    /// Entries attributed to `path`, a source or a header.
    pub fn entries_in_file(&self, path: &Path) -> Vec<IndexEntry> {
        let path = normalize_path(path);
        let Some(project) = self.core.workspace.project_of(&path) else {
            return Vec::new();
        };
        let stored = self.core.workspace.index_path(&path);
        self.with_index(&project, |index| index.entries_in_file(&stored))
            .unwrap_or_default()
    }

    /// Entries in `project` attributed to an external header.
    pub fn entries_in_external_file(&self, project: &Path, header: &Path) -> Vec<IndexEntry> {
        let stored = normalize_path(header);
        self.with_index(project, |index| index.entries_in_file(&stored))
            .unwrap_or_default()
    }

    pub fn derived_classes(&self, project: &Path, base: &QualifiedName) -> Vec<QualifiedName> {
        self.with_index(project, |index| index.derived_classes(base))
            .unwrap_or_default()
    }

    pub fn friends_of(&self, project: &Path, class: &QualifiedName) -> Vec<QualifiedName> {
        self.with_index(project, |index| index.friends_of(class))
            .unwrap_or_default()
    }

    /// Files known to the project's index, with their stored paths.
    pub fn indexed_files(&self, project: &Path) -> Vec<QueryResult> {
        self.with_index(project, |index| index.query_in_document_names(Path::new("")))
            .unwrap_or_default()
    }

    pub fn has_encountered_header(&self, project: &Path, header: &Path) -> bool {
        self.core.headers.have_encountered(project, header, false)
    }

    fn with_index<T>(&self, project: &Path, read: impl FnOnce(&crate::storage::Index) -> T) -> Option<T> {
        let project = normalize_path(project);
        let handle = self.core.store.get_index(&project, true, false)?;
        let index = handle.read();
        if index.is_dropped() {
            return None;
        }
        Some(read(&index))
    }

    // =========================================================================
    // Worker control
    // =========================================================================

    pub fn state(&self) -> WorkerState {
        self.jobs.state()
    }

    pub fn resume(&self) -> bool {
        self.jobs.resume()
    }

    /// Cancel the running job; the worker then waits until resumed or an
    /// index-all arrives.
    pub fn cancel_current(&self) -> bool {
        self.jobs.cancel_current()
    }

    pub fn pending_jobs(&self) -> usize {
        self.jobs.pending_count()
    }

    /// Block until no job is queued or running. Returns `false` on timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.jobs.wait_until_idle(timeout)
    }

    pub fn stats(&self) -> IndexingStats {
        self.core.stats()
    }

    /// Stop the worker, save what is dirty, and flush pending notifications.
    pub fn shutdown(&self) {
        if self.jobs.state() == WorkerState::Disabled {
            return;
        }
        self.jobs.shutdown();
        let saved = self.core.store.save_indexes();
        self.core.notifier.shutdown();
        crate::debug_event!("indexer", "shut down", "{saved} indexes saved");
    }

    fn eligible_project(&self, path: &Path) -> Option<PathBuf> {
        let config = &self.core.config;
        if !config.is_indexable(path) {
            return None;
        }
        let project = self.core.workspace.project_of(path)?;
        config.is_project_enabled(&project).then_some(project)
    }
}

impl Drop for SourceIndexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
