//! File-system watcher for the workspace root.
//!
//! Raw `notify` events are folded by the [`Debouncer`] and, once a path has
//! been quiet, mapped to a [`ResourceDelta`] and handed to a [`DeltaSink`]
//! (normally the [`SourceIndexer`]).

use std::path::{Component, Path};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::debouncer::Debouncer;
use super::error::WatchError;
use crate::config::{IndexingConfig, Settings, WatcherConfig};
use crate::indexing::{DeltaKind, ResourceDelta, ResourceKind, SourceIndexer, Workspace};
use crate::{debug_event, log_event};

const TICK: Duration = Duration::from_millis(50);

/// Receiver of debounced workspace changes.
pub trait DeltaSink: Send + Sync {
    fn handle_delta(&self, delta: &ResourceDelta) -> bool;
}

impl DeltaSink for SourceIndexer {
    fn handle_delta(&self, delta: &ResourceDelta) -> bool {
        SourceIndexer::handle_delta(self, delta)
    }
}

impl<F> DeltaSink for F
where
    F: Fn(&ResourceDelta) -> bool + Send + Sync,
{
    fn handle_delta(&self, delta: &ResourceDelta) -> bool {
        self(delta)
    }
}

pub struct WorkspaceWatcher {
    watcher: Option<RecommendedWatcher>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl WorkspaceWatcher {
    /// Watch the indexer's workspace and feed changes back into it.
    /// Returns `None` when `[watcher] enabled` is off.
    pub fn for_indexer(
        indexer: Arc<SourceIndexer>,
        settings: &Settings,
    ) -> Result<Option<Self>, WatchError> {
        if !settings.watcher.enabled {
            return Ok(None);
        }
        let workspace = indexer.workspace().clone();
        Self::start(workspace, settings.indexing.clone(), &settings.watcher, indexer).map(Some)
    }

    pub fn start(
        workspace: Workspace,
        indexing: IndexingConfig,
        config: &WatcherConfig,
        sink: Arc<dyn DeltaSink>,
    ) -> Result<Self, WatchError> {
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.send(res);
            },
            Config::default(),
        )?;
        watcher
            .watch(workspace.root(), RecursiveMode::Recursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: workspace.root().to_path_buf(),
                reason: e.to_string(),
            })?;

        log_event!("watcher", "watching", "{}", workspace.root().display());

        let debounce_ms = config.debounce_ms;
        let handle = std::thread::Builder::new()
            .name("ccindex-watch".to_string())
            .spawn(move || {
                let loop_state = WatchLoop {
                    workspace,
                    indexing,
                    debouncer: Debouncer::new(debounce_ms),
                    sink,
                };
                loop_state.run(event_rx, stop_rx);
            })
            .map_err(WatchError::Thread)?;

        Ok(Self {
            watcher: Some(watcher),
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop watching. Changes still inside the debounce window are dropped.
    pub fn stop(&mut self) {
        // Dropping the notify watcher closes the event channel.
        self.watcher.take();
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkspaceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WatchLoop {
    workspace: Workspace,
    indexing: IndexingConfig,
    debouncer: Debouncer,
    sink: Arc<dyn DeltaSink>,
}

impl WatchLoop {
    fn run(mut self, events: Receiver<notify::Result<Event>>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(events) -> msg => match msg {
                    Ok(Ok(event)) => self.record(event),
                    Ok(Err(e)) => tracing::warn!(target: "watcher", "watch error: {e}"),
                    Err(_) => break,
                },
                recv(stop) -> _ => break,
                default(TICK) => {}
            }
            self.flush();
        }
        debug_event!("watcher", "stopped");
    }

    fn record(&mut self, event: Event) {
        let Some(change) = change_of(&event.kind) else {
            return;
        };
        for path in event.paths {
            if !is_hidden(self.workspace.root(), &path) {
                self.debouncer.record(path, change);
            }
        }
    }

    fn flush(&mut self) {
        for (path, change) in self.debouncer.take_ready() {
            let Some(delta) = resource_delta(&self.workspace, &self.indexing, &path, change) else {
                continue;
            };
            debug_event!(
                "watcher",
                "delta",
                "{:?} {:?} {}",
                delta.change,
                delta.kind,
                delta.path.display()
            );
            self.sink.handle_delta(&delta);
        }
    }
}

fn change_of(kind: &EventKind) -> Option<DeltaKind> {
    match kind {
        EventKind::Create(_) => Some(DeltaKind::Added),
        EventKind::Remove(_) => Some(DeltaKind::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(DeltaKind::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(DeltaKind::Added),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(DeltaKind::Changed),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

/// Paths under a dot-directory of the workspace (the index itself, `.git`).
fn is_hidden(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return true;
    };
    relative.components().any(|component| match component {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

/// Classify a quiet path as a project, folder or compilation unit change.
pub(crate) fn resource_delta(
    workspace: &Workspace,
    indexing: &IndexingConfig,
    path: &Path,
    change: DeltaKind,
) -> Option<ResourceDelta> {
    let project = workspace.project_of(path)?;
    let exists = path.exists();
    // A rename-then-replace can leave a "removed" path that is back on disk.
    let change = match change {
        DeltaKind::Removed if exists => DeltaKind::Changed,
        DeltaKind::Added | DeltaKind::Changed if !exists => DeltaKind::Removed,
        other => other,
    };

    let kind = if path == project.as_path() {
        ResourceKind::Project
    } else if indexing.is_indexable(path) {
        ResourceKind::CompilationUnit
    } else if path.is_dir() {
        ResourceKind::Folder
    } else if !exists && path.extension().is_none() {
        ResourceKind::Folder
    } else {
        return None;
    };

    // Edits inside a directory arrive as file events of their own.
    if kind != ResourceKind::CompilationUnit && change == DeltaKind::Changed {
        return None;
    }
    Some(ResourceDelta::new(project, path, kind, change))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn layout() -> (TempDir, Workspace) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("app/src")).unwrap();
        fs::write(dir.path().join("app/src/a.cpp"), "int a;").unwrap();
        fs::write(dir.path().join("app/README.md"), "docs").unwrap();
        let workspace = Workspace::new(dir.path());
        (dir, workspace)
    }

    #[test]
    fn test_source_change_is_compilation_unit() {
        let (dir, workspace) = layout();
        let config = IndexingConfig::default();
        let path = dir.path().join("app/src/a.cpp");

        let delta = resource_delta(&workspace, &config, &path, DeltaKind::Changed).unwrap();
        assert_eq!(delta.kind, ResourceKind::CompilationUnit);
        assert_eq!(delta.change, DeltaKind::Changed);
        assert_eq!(delta.project, workspace.root().join("app"));
    }

    #[test]
    fn test_vanished_file_is_removal() {
        let (dir, workspace) = layout();
        let config = IndexingConfig::default();
        let path = dir.path().join("app/src/gone.cpp");

        let delta = resource_delta(&workspace, &config, &path, DeltaKind::Changed).unwrap();
        assert_eq!(delta.change, DeltaKind::Removed);
        assert_eq!(delta.kind, ResourceKind::CompilationUnit);
    }

    #[test]
    fn test_folders_and_projects() {
        let (dir, workspace) = layout();
        let config = IndexingConfig::default();

        let folder = resource_delta(
            &workspace,
            &config,
            &dir.path().join("app/src"),
            DeltaKind::Added,
        )
        .unwrap();
        assert_eq!(folder.kind, ResourceKind::Folder);

        let removed = resource_delta(
            &workspace,
            &config,
            &dir.path().join("app/old"),
            DeltaKind::Removed,
        )
        .unwrap();
        assert_eq!(removed.kind, ResourceKind::Folder);

        let project =
            resource_delta(&workspace, &config, &dir.path().join("app"), DeltaKind::Added)
                .unwrap();
        assert_eq!(project.kind, ResourceKind::Project);

        assert!(
            resource_delta(&workspace, &config, &dir.path().join("app/src"), DeltaKind::Changed)
                .is_none()
        );
    }

    #[test]
    fn test_non_sources_ignored() {
        let (dir, workspace) = layout();
        let config = IndexingConfig::default();
        let readme = dir.path().join("app/README.md");
        assert!(resource_delta(&workspace, &config, &readme, DeltaKind::Changed).is_none());

        let outside = PathBuf::from("/elsewhere/x.cpp");
        assert!(resource_delta(&workspace, &config, &outside, DeltaKind::Changed).is_none());
    }

    #[test]
    fn test_hidden_paths() {
        let root = Path::new("/ws");
        assert!(is_hidden(root, Path::new("/ws/.ccindex/index/app.ccix")));
        assert!(is_hidden(root, Path::new("/ws/app/.git/HEAD")));
        assert!(!is_hidden(root, Path::new("/ws/app/src/a.cpp")));
        assert!(is_hidden(root, Path::new("/other/a.cpp")));
    }

    #[test]
    fn test_event_kinds() {
        use notify::event::{CreateKind, DataChange, MetadataKind};
        assert_eq!(
            change_of(&EventKind::Create(CreateKind::File)),
            Some(DeltaKind::Added)
        );
        assert_eq!(
            change_of(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(DeltaKind::Changed)
        );
        assert_eq!(
            change_of(&EventKind::Modify(ModifyKind::Name(RenameMode::From))),
            Some(DeltaKind::Removed)
        );
        assert_eq!(
            change_of(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))),
            None
        );
    }

    #[test]
    fn test_watcher_reports_new_file() {
        use parking_lot::Mutex;

        let (dir, workspace) = layout();
        let seen: Arc<Mutex<Vec<ResourceDelta>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: Arc<dyn DeltaSink> = Arc::new(move |delta: &ResourceDelta| {
            sink_seen.lock().push(delta.clone());
            true
        });

        let config = WatcherConfig {
            enabled: true,
            debounce_ms: 20,
        };
        let mut watcher =
            WorkspaceWatcher::start(workspace, IndexingConfig::default(), &config, sink).unwrap();

        let created = dir.path().join("app/src/b.cpp");
        fs::write(&created, "int b;").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if seen.lock().iter().any(|d| d.path.ends_with("b.cpp")) {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        watcher.stop();

        let seen = seen.lock();
        let delta = seen.iter().find(|d| d.path.ends_with("b.cpp")).unwrap();
        assert_eq!(delta.kind, ResourceKind::CompilationUnit);
        assert_ne!(delta.change, DeltaKind::Removed);
    }
}
