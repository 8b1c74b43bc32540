//! Job execution.
//!
//! [`IndexerCore`] owns everything the worker needs and runs each [`Job`].
//! All writes for one translation unit happen under a single write
//! acquisition of the project's index monitor, so readers never see half a
//! unit. Failures stop at the job boundary: they are logged with the
//! resource path and turned into the job's `bool` result.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::notify::{IndexDelta, IndexDeltaKind, Notifier};
use super::walker::FileWalker;
use super::workspace::Workspace;
use crate::config::IndexingConfig;
use crate::headers::HeaderTracker;
use crate::jobs::{Job, JobExecutor, JobQueue, ProgressMonitor};
use crate::parsing::{ParseError, SearchPathConfig, SourceBuffer, TranslationUnitParser};
use crate::storage::IndexStore;
use crate::utils::file_stamp;
use crate::visitor::{FileFlagResolver, index_translation_unit};

/// Running totals since the indexer started.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexingStats {
    pub files_indexed: usize,
    pub files_removed: usize,
    pub entries_written: usize,
    pub problems: usize,
    /// Unchanged files an index-all walk did not queue.
    pub files_unchanged: usize,
}

pub struct IndexerCore {
    pub(crate) config: IndexingConfig,
    pub(crate) workspace: Workspace,
    pub(crate) store: IndexStore,
    pub(crate) headers: HeaderTracker,
    pub(crate) notifier: Notifier,
    parser: Box<dyn TranslationUnitParser>,
    search_paths: SearchPathConfig,
    walker: FileWalker,
    /// Set when a job changed an index since the last idle save.
    needs_save: AtomicBool,
    /// When the last save attempt left an index unwritten.
    last_failed_save: Mutex<Option<Instant>>,
    stats: Mutex<IndexingStats>,
}

impl IndexerCore {
    pub(crate) fn new(
        config: IndexingConfig,
        workspace: Workspace,
        store: IndexStore,
        parser: Box<dyn TranslationUnitParser>,
        notifier: Notifier,
    ) -> Self {
        let search_paths = SearchPathConfig {
            include_paths: config.include_paths.clone(),
            follow_includes: config.follow_includes,
        };
        Self {
            walker: FileWalker::new(&config),
            config,
            workspace,
            store,
            headers: HeaderTracker::new(),
            notifier,
            parser,
            search_paths,
            needs_save: AtomicBool::new(false),
            last_failed_save: Mutex::new(None),
            stats: Mutex::new(IndexingStats::default()),
        }
    }

    pub(crate) fn stats(&self) -> IndexingStats {
        *self.stats.lock()
    }

    fn add_file(
        &self,
        project: &Path,
        path: &Path,
        contents: Option<Arc<str>>,
        check_headers: bool,
        progress: &ProgressMonitor,
    ) -> bool {
        if check_headers
            && self.config.is_header(path)
            && self.headers.have_encountered(project, path, false)
        {
            tracing::trace!(target: "indexer", "header {} already indexed", path.display());
            return true;
        }

        let buffer = match contents {
            Some(contents) => SourceBuffer::new(path, contents),
            None => match SourceBuffer::read(path) {
                Ok(buffer) => buffer,
                Err(_) if !path.exists() => {
                    tracing::debug!(target: "indexer", "{} vanished before indexing", path.display());
                    return true;
                }
                Err(e) => {
                    tracing::warn!(target: "indexer", "cannot index {}: {e}", path.display());
                    return false;
                }
            },
        };

        let outcome = match self.parser.parse(&buffer, &self.search_paths) {
            Ok(outcome) => outcome,
            Err(e @ ParseError::Read { .. }) => {
                tracing::warn!(target: "indexer", "cannot index {}: {e}", path.display());
                return false;
            }
            Err(e) => {
                tracing::warn!(target: "indexer", "failed to parse {}: {e}", path.display());
                return true;
            }
        };
        let Some(unit) = outcome.unit else {
            tracing::debug!(target: "indexer", "no translation unit for {}", path.display());
            return true;
        };
        if outcome.had_errors {
            tracing::debug!(target: "indexer", "{} has syntax errors, indexing what parsed", path.display());
        }

        // A discard may have removed the index while this file was parsing.
        if progress.is_canceled() {
            return true;
        }
        let Some(handle) = self.store.get_index(project, true, true) else {
            tracing::warn!(target: "indexer", "index for {} unavailable", project.display());
            return false;
        };

        let (report, was_clean) = {
            let mut index = handle.write();
            if index.is_dropped() || progress.is_canceled() {
                return true;
            }
            let was_clean = !index.is_dirty();
            let files = match FileFlagResolver::new(&self.workspace, &self.headers, project, path, &mut index) {
                Ok(files) => files.with_header_check(self.config.check_encountered_headers),
                Err(e) => {
                    tracing::error!(target: "indexer", "cannot register {}: {e}", path.display());
                    return true;
                }
            };
            match index_translation_unit(&unit, &mut index, files) {
                Ok(report) => (report, was_clean),
                Err(e) => {
                    tracing::error!(target: "indexer", "indexing {} failed: {e}", path.display());
                    return true;
                }
            }
        };
        if was_clean {
            self.store.mark_updating(project);
        }

        for include in &unit.includes {
            self.headers.have_encountered(project, &include.path, true);
        }
        if self.config.is_header(path) {
            self.headers.have_encountered(project, path, true);
        }

        if self.config.report_problems {
            for problem in &report.problems {
                let location = problem
                    .location
                    .as_ref()
                    .map(|l| format!("{}:{}:{}", l.path.display(), l.line, l.column))
                    .unwrap_or_else(|| path.display().to_string());
                tracing::info!(target: "indexer", "{location}: unresolved '{}': {}", problem.name, problem.message);
            }
        }

        {
            let mut stats = self.stats.lock();
            stats.files_indexed += 1;
            stats.entries_written += report.stats.entries;
            stats.problems += report.problems.len();
        }
        crate::debug_event!(
            "indexer",
            "indexed",
            "{} ({} entries, {} problems, {} skipped)",
            path.display(),
            report.stats.entries,
            report.problems.len(),
            report.stats.skipped
        );
        true
    }

    fn add_folder(&self, project: &Path, folder: &Path, queue: &JobQueue, progress: &ProgressMonitor) -> bool {
        let files = match self.walker.walk(folder) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(target: "indexer", "cannot walk {}: {e}", folder.display());
                return true;
            }
        };
        progress.begin(files.len());
        self.queue_files(project, files.sources.into_iter().chain(files.headers), queue, progress);
        true
    }

    /// Bring `project` up to date with the files on disk.
    ///
    /// Every file the index knows starts out as deleted; files found by the
    /// walk are un-marked and queued unless their stamp is unchanged, and
    /// the ones still marked deleted are queued for removal.
    fn index_all(&self, project: &Path, queue: &JobQueue, progress: &ProgressMonitor) -> bool {
        if !self.workspace.is_project(project) {
            tracing::warn!(target: "indexer", "project {} not found", project.display());
            return false;
        }
        self.headers.clean_encountered_headers(project);

        let files = match self.walker.walk(project) {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(
                    target: "indexer",
                    "walking {} failed, dropping its index: {e}",
                    project.display()
                );
                queue.discard_jobs(project);
                self.store.remove_index(project);
                self.notifier.notify(IndexDelta::new(project, IndexDeltaKind::IndexRemoved));
                return true;
            }
        };

        let Some(handle) = self.store.get_index(project, true, true) else {
            return false;
        };

        // Everything the index knows under the project starts out deleted.
        let mut deleted: HashMap<PathBuf, Option<u64>> = handle
            .read()
            .query_in_document_names(Path::new(""))
            .into_iter()
            .map(|row| (self.workspace.absolute(&row.path), row.stamp))
            .filter(|(path, _)| path.starts_with(project))
            .collect();

        progress.begin(files.len());
        let mut changed = Vec::new();
        let mut unchanged = 0;
        for path in files.sources.iter().chain(&files.headers) {
            if progress.is_canceled() {
                return true;
            }
            if let Some(stored) = deleted.remove(path) {
                if stored.is_some() && stored == file_stamp(path) {
                    unchanged += 1;
                    progress.worked(1);
                    continue;
                }
            }
            changed.push(path.clone());
        }

        let mut deleted: Vec<PathBuf> = deleted.into_keys().collect();
        deleted.sort();

        crate::debug_event!(
            "indexer",
            "index-all",
            "{}: {} changed, {unchanged} unchanged, {} deleted",
            project.display(),
            changed.len(),
            deleted.len()
        );
        self.stats.lock().files_unchanged += unchanged;

        for path in deleted {
            queue.request(Job::RemoveFile {
                project: project.to_path_buf(),
                path,
            });
        }
        self.queue_files(project, changed.into_iter(), queue, progress);
        true
    }

    fn queue_files(
        &self,
        project: &Path,
        files: impl Iterator<Item = PathBuf>,
        queue: &JobQueue,
        progress: &ProgressMonitor,
    ) {
        let check_headers = self.config.check_encountered_headers;
        for path in files {
            if progress.is_canceled() {
                return;
            }
            queue.request(Job::AddFile {
                project: project.to_path_buf(),
                path,
                contents: None,
                check_headers,
            });
            progress.worked(1);
        }
    }

    fn remove_file(&self, project: &Path, path: &Path) -> bool {
        let Some(handle) = self.store.get_index(project, true, false) else {
            return true;
        };
        let removed = handle.write().remove_file(&self.workspace.index_path(path));
        if removed {
            self.stats.lock().files_removed += 1;
            crate::debug_event!("indexer", "removed", "{}", path.display());
        }
        true
    }

    fn remove_folder(&self, project: &Path, folder: &Path) -> bool {
        let Some(handle) = self.store.get_index(project, true, false) else {
            return true;
        };
        let removed = handle
            .write()
            .remove_files_under(&self.workspace.index_path(folder));
        self.stats.lock().files_removed += removed;
        crate::debug_event!("indexer", "removed folder", "{} ({removed} files)", folder.display());
        true
    }

    fn save(&self, project: Option<&Path>) -> bool {
        match project {
            Some(project) => {
                if let Some(handle) = self.store.get_index(project, true, false) {
                    if self.store.save_index(&handle).is_err() {
                        *self.last_failed_save.lock() = Some(Instant::now());
                    }
                }
            }
            None => {
                self.store.save_indexes();
                self.note_save_outcome();
            }
        }
        true
    }

    fn note_save_outcome(&self) {
        *self.last_failed_save.lock() = self.store.has_failed_saves().then(Instant::now);
    }

    /// Completion bookkeeping for a job that will not run again.
    pub(crate) fn index_job_finished(&self, job: &Job) {
        let delta = match job {
            Job::AddFile { project, path, .. } => {
                IndexDelta::new(project, IndexDeltaKind::FileIndexed).with_path(path)
            }
            Job::AddFolder { .. } => {
                // the queued add-file jobs report their own changes
                return;
            }
            Job::IndexAll { project } => IndexDelta::new(project, IndexDeltaKind::ProjectIndexed),
            Job::RemoveFile { project, path } => {
                IndexDelta::new(project, IndexDeltaKind::FileRemoved).with_path(path)
            }
            Job::RemoveFolder { project, folder } => {
                IndexDelta::new(project, IndexDeltaKind::FolderRemoved).with_path(folder)
            }
            Job::Save { project } => {
                self.needs_save.store(false, Ordering::Release);
                let project = project.clone().unwrap_or_else(|| self.workspace.root().to_path_buf());
                self.notifier.notify(IndexDelta::new(project, IndexDeltaKind::Saved));
                return;
            }
        };
        self.needs_save.store(true, Ordering::Release);
        self.notifier.notify(delta);
    }

    /// Save dirty indexes once the worker has been idle long enough, and
    /// queue rebuilds for indexes found corrupt on load.
    ///
    /// An index whose save failed stays dirty and is retried on a later
    /// idle tick, at most once per threshold.
    pub(crate) fn notify_idle(&self, idle_for: Duration, queue: &JobQueue) {
        for project in self.store.drain_rebuild_requests() {
            tracing::info!(target: "indexer", "rebuilding index for {}", project.display());
            queue.resume();
            queue.request(Job::index_all(project));
        }

        let threshold = Duration::from_millis(self.config.idle_save_threshold_ms);
        if idle_for < threshold {
            return;
        }
        let changed = self.needs_save.swap(false, Ordering::AcqRel);
        let retry = self.store.has_failed_saves()
            && self
                .last_failed_save
                .lock()
                .map_or(true, |at| at.elapsed() >= threshold);
        if !changed && !retry {
            return;
        }
        let saved = self.store.save_indexes();
        self.note_save_outcome();
        if retry && !self.store.has_failed_saves() {
            tracing::info!(target: "indexer", "retried save succeeded");
        }
        if saved > 0 {
            crate::debug_event!("indexer", "idle save", "{saved} indexes after {idle_for:?}");
            let root = self.workspace.root().to_path_buf();
            self.notifier.notify(IndexDelta::new(root, IndexDeltaKind::Saved));
        }
    }
}

impl JobExecutor for IndexerCore {
    fn execute(&self, job: &Job, queue: &JobQueue, progress: &ProgressMonitor) -> bool {
        if progress.is_canceled() {
            return true;
        }
        match job {
            Job::AddFile {
                project,
                path,
                contents,
                check_headers,
            } => self.add_file(project, path, contents.clone(), *check_headers, progress),
            Job::AddFolder { project, folder } => self.add_folder(project, folder, queue, progress),
            Job::IndexAll { project } => self.index_all(project, queue, progress),
            Job::RemoveFile { project, path } => self.remove_file(project, path),
            Job::RemoveFolder { project, folder } => self.remove_folder(project, folder),
            Job::Save { project } => self.save(project.as_deref()),
        }
    }

    fn job_finished(&self, job: &Job, _queue: &JobQueue) {
        self.index_job_finished(job);
    }

    fn idle(&self, idle_for: Duration, queue: &JobQueue) {
        self.notify_idle(idle_for, queue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::QueueConfig;
    use crate::parsing::CppParser;
    use std::fs;
    use tempfile::TempDir;

    fn core(temp_dir: &TempDir, idle_save_threshold_ms: u64) -> IndexerCore {
        let config = IndexingConfig {
            idle_save_threshold_ms,
            ..IndexingConfig::default()
        };
        IndexerCore::new(
            config,
            Workspace::new(temp_dir.path()),
            IndexStore::open(temp_dir.path().join(".ccindex")).unwrap(),
            Box::new(CppParser::new()),
            Notifier::new().unwrap(),
        )
    }

    #[test]
    fn test_canceled_add_file_leaves_no_index() {
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("proj");
        fs::create_dir_all(&project).unwrap();
        let path = project.join("a.cpp");
        fs::write(&path, "class A {};\n").unwrap();

        let core = core(&temp_dir, 0);
        let progress = ProgressMonitor::new();
        progress.cancel();

        assert!(core.add_file(&project, &path, None, false, &progress));
        assert!(core.store.loaded_projects().is_empty());
        assert_eq!(core.stats().files_indexed, 0);
    }

    #[test]
    fn test_failed_idle_save_is_retried() {
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("proj");
        let core = core(&temp_dir, 0);
        let queue = JobQueue::new(QueueConfig::default());

        let handle = core.store.get_index(&project, true, true).unwrap();
        let location = handle.location().to_path_buf();
        fs::create_dir_all(location.join("blocker")).unwrap();

        core.index_job_finished(&Job::add_file(project.clone(), project.join("a.cpp")));
        core.notify_idle(Duration::from_secs(1), &queue);
        assert!(core.store.has_failed_saves());
        assert!(handle.read().is_dirty());

        // Nothing new was indexed; the retry alone must write the file.
        fs::remove_dir_all(&location).unwrap();
        core.notify_idle(Duration::from_secs(1), &queue);
        assert!(!core.store.has_failed_saves());
        assert!(!handle.read().is_dirty());
        assert!(location.is_file());
        queue.shutdown();
    }

    #[test]
    fn test_idle_save_waits_for_threshold() {
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("proj");
        let core = core(&temp_dir, 60_000);
        let queue = JobQueue::new(QueueConfig::default());

        let handle = core.store.get_index(&project, true, true).unwrap();
        core.index_job_finished(&Job::add_file(project.clone(), project.join("a.cpp")));

        core.notify_idle(Duration::from_millis(10), &queue);
        assert!(handle.read().is_dirty());

        core.notify_idle(Duration::from_secs(61), &queue);
        assert!(!handle.read().is_dirty());
        assert!(handle.location().is_file());
        queue.shutdown();
    }
}
