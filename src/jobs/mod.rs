//! Background indexing jobs.
//!
//! Every index mutation is expressed as a [`Job`] and executed serially by
//! the single worker owned by [`JobQueue`].

pub mod progress;
pub mod queue;

pub use progress::ProgressMonitor;
pub use queue::{JobQueue, QueueConfig, WorkerState};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A unit of indexing work.
///
/// Equality is structural over kind, project and path. Preloaded contents
/// and the header-check flag do not distinguish two jobs, so a second
/// request for a file that is already pending is dropped.
#[derive(Debug, Clone)]
pub enum Job {
    /// Index one translation unit (or header).
    AddFile {
        project: PathBuf,
        path: PathBuf,
        /// Contents captured at request time; read from disk when `None`.
        contents: Option<Arc<str>>,
        check_headers: bool,
    },
    /// Index every eligible file under a folder.
    AddFolder { project: PathBuf, folder: PathBuf },
    /// Bring a whole project up to date.
    IndexAll { project: PathBuf },
    RemoveFile { project: PathBuf, path: PathBuf },
    RemoveFolder { project: PathBuf, folder: PathBuf },
    /// Flush one project's index, or every dirty index.
    Save { project: Option<PathBuf> },
}

impl Job {
    pub fn add_file(project: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        Job::AddFile {
            project: project.into(),
            path: path.into(),
            contents: None,
            check_headers: false,
        }
    }

    pub fn index_all(project: impl Into<PathBuf>) -> Self {
        Job::IndexAll {
            project: project.into(),
        }
    }

    /// Project the job works on; `None` for a global save.
    pub fn project(&self) -> Option<&Path> {
        match self {
            Job::AddFile { project, .. }
            | Job::AddFolder { project, .. }
            | Job::IndexAll { project }
            | Job::RemoveFile { project, .. }
            | Job::RemoveFolder { project, .. } => Some(project.as_path()),
            Job::Save { project } => project.as_deref(),
        }
    }

    /// File or folder the job targets, if narrower than the project.
    pub fn resource(&self) -> Option<&Path> {
        match self {
            Job::AddFile { path, .. } | Job::RemoveFile { path, .. } => Some(path.as_path()),
            Job::AddFolder { folder, .. } | Job::RemoveFolder { folder, .. } => Some(folder.as_path()),
            Job::IndexAll { .. } | Job::Save { .. } => None,
        }
    }

    pub fn belongs_to(&self, project: &Path) -> bool {
        self.project().is_some_and(|p| p.starts_with(project))
    }

    fn kind(&self) -> &'static str {
        match self {
            Job::AddFile { .. } => "add-file",
            Job::AddFolder { .. } => "add-folder",
            Job::IndexAll { .. } => "index-all",
            Job::RemoveFile { .. } => "remove-file",
            Job::RemoveFolder { .. } => "remove-folder",
            Job::Save { .. } => "save",
        }
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind()
            && self.project() == other.project()
            && self.resource() == other.resource()
    }
}

impl Eq for Job {}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind())?;
        match (self.resource(), self.project()) {
            (Some(resource), _) => write!(f, " {}", resource.display()),
            (None, Some(project)) => write!(f, " {}", project.display()),
            (None, None) => write!(f, " (all)"),
        }
    }
}

/// What the worker calls into.
pub trait JobExecutor: Send + Sync {
    /// Run one job. `false` asks for a retry; cancellation and terminal
    /// failures return `true`.
    fn execute(&self, job: &Job, queue: &JobQueue, progress: &ProgressMonitor) -> bool;

    /// Called once per job that will not run again.
    fn job_finished(&self, job: &Job, queue: &JobQueue);

    /// Called periodically while the queue has nothing to run.
    fn idle(&self, idle_for: Duration, queue: &JobQueue);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_payload() {
        let plain = Job::add_file("/ws/app", "/ws/app/a.cpp");
        let preloaded = Job::AddFile {
            project: PathBuf::from("/ws/app"),
            path: PathBuf::from("/ws/app/a.cpp"),
            contents: Some(Arc::from("int x;")),
            check_headers: true,
        };
        assert_eq!(plain, preloaded);
        assert_ne!(plain, Job::add_file("/ws/app", "/ws/app/b.cpp"));
        assert_ne!(
            plain,
            Job::RemoveFile {
                project: PathBuf::from("/ws/app"),
                path: PathBuf::from("/ws/app/a.cpp"),
            }
        );
    }

    #[test]
    fn test_project_membership() {
        let job = Job::index_all("/ws/app");
        assert!(job.belongs_to(Path::new("/ws/app")));
        assert!(!job.belongs_to(Path::new("/ws/lib")));
        assert!(!Job::Save { project: None }.belongs_to(Path::new("/ws/app")));
    }

    #[test]
    fn test_display() {
        assert_eq!(Job::index_all("/ws/app").to_string(), "index-all /ws/app");
        assert_eq!(Job::add_file("/ws/app", "/ws/app/a.cpp").to_string(), "add-file /ws/app/a.cpp");
        assert_eq!(Job::Save { project: None }.to_string(), "save (all)");
    }
}
