//! Per-project set of headers already indexed through some translation unit.
//!
//! Consulted before scheduling a header on its own and while attributing
//! names that live in external headers, so a popular header is indexed once
//! per project instead of once per inclusion.

use dashmap::DashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::utils::normalize_path;

#[derive(Debug, Default)]
pub struct HeaderTracker {
    projects: DashMap<PathBuf, HashSet<PathBuf>>,
}

impl HeaderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `file` was already seen for `project`.
    ///
    /// With `add_if_absent`, an unseen header is recorded and `false` is
    /// returned, so the first caller wins and later ones see `true`.
    pub fn have_encountered(&self, project: &Path, file: &Path, add_if_absent: bool) -> bool {
        let file = normalize_path(file);

        if !add_if_absent {
            return self
                .projects
                .get(project)
                .is_some_and(|headers| headers.contains(&file));
        }

        let mut headers = self.projects.entry(project.to_path_buf()).or_default();
        !headers.insert(file)
    }

    /// Forget every header seen for `project` (full re-index of that project).
    pub fn clean_encountered_headers(&self, project: &Path) {
        self.projects.remove(project);
    }

    /// Forget every header for every project.
    pub fn reset_encountered_headers(&self) {
        self.projects.clear();
    }

    pub fn encountered_count(&self, project: &Path) -> usize {
        self.projects.get(project).map_or(0, |headers| headers.len())
    }
}
