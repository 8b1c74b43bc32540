//! Workspace layout: which project owns a path and how paths are stored.
//!
//! Projects are the directories directly below the workspace root. Paths
//! inside the workspace are stored workspace-relative (`proj/src/a.cpp`);
//! anything outside is external and stored as its absolute path.

use std::path::{Component, Path, PathBuf};

use crate::error::{IndexError, IndexResult};
use crate::utils::normalize_path;

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: normalize_path(&root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_local(&self, path: &Path) -> bool {
        normalize_path(path).starts_with(&self.root)
    }

    /// Path as recorded in an index.
    pub fn index_path(&self, path: &Path) -> PathBuf {
        let normalized = normalize_path(path);
        match normalized.strip_prefix(&self.root) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => normalized,
        }
    }

    /// Inverse of [`index_path`](Self::index_path).
    pub fn absolute(&self, stored: &Path) -> PathBuf {
        if stored.is_absolute() {
            stored.to_path_buf()
        } else {
            self.root.join(stored)
        }
    }

    /// Project directory owning `path`, if it is inside the workspace.
    pub fn project_of(&self, path: &Path) -> Option<PathBuf> {
        let normalized = normalize_path(path);
        let relative = normalized.strip_prefix(&self.root).ok()?;
        match relative.components().next()? {
            Component::Normal(name) => Some(self.root.join(name)),
            _ => None,
        }
    }

    /// Stored-path prefix under which a project's files live.
    pub fn project_prefix(&self, project: &Path) -> PathBuf {
        self.index_path(project)
    }

    pub fn is_project(&self, project: &Path) -> bool {
        let project = normalize_path(project);
        project.parent() == Some(self.root.as_path()) && project.is_dir()
    }

    /// Every project currently on disk, hidden directories excluded.
    pub fn projects(&self) -> IndexResult<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.root).map_err(|source| IndexError::FileRead {
            path: self.root.clone(),
            source,
        })?;

        let mut projects: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|ft| ft.is_dir()))
            .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
            .map(|entry| entry.path())
            .collect();
        projects.sort();
        Ok(projects)
    }
}
