//! Project tree walker.
//!
//! Finds the C/C++ files to index under a project or folder, honoring
//! `.gitignore`, a project-level `.ccindexignore`, and the configured ignore
//! patterns. Hidden files and directories are skipped.

use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use std::path::{Path, PathBuf};

use crate::config::IndexingConfig;
use crate::error::{IndexError, IndexResult};

const IGNORE_FILE: &str = ".ccindexignore";

/// Which files of a walk are sources and which are headers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WalkedFiles {
    pub sources: Vec<PathBuf>,
    pub headers: Vec<PathBuf>,
}

impl WalkedFiles {
    pub fn len(&self) -> usize {
        self.sources.len() + self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.headers.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.sources.iter().chain(&self.headers).any(|p| p == path)
    }
}

pub struct FileWalker {
    config: IndexingConfig,
}

impl FileWalker {
    pub fn new(config: &IndexingConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Walk `root` and return every indexable file, sorted.
    ///
    /// Fails only when `root` itself cannot be read; unreadable entries
    /// below it are logged and skipped.
    pub fn walk(&self, root: &Path) -> IndexResult<WalkedFiles> {
        let metadata = std::fs::metadata(root).map_err(|source| IndexError::FileRead {
            path: root.to_path_buf(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(IndexError::ProjectNotFound(root.to_path_buf()));
        }

        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .follow_links(false)
            .require_git(false);
        builder.add_custom_ignore_filename(IGNORE_FILE);

        let mut overrides = OverrideBuilder::new(root);
        for pattern in &self.config.ignore_patterns {
            if let Err(e) = overrides.add(&format!("!{pattern}")) {
                tracing::warn!(target: "indexer", "invalid ignore pattern '{pattern}': {e}");
            }
        }
        match overrides.build() {
            Ok(overrides) => {
                builder.overrides(overrides);
            }
            Err(e) => tracing::warn!(target: "indexer", "ignoring override patterns: {e}"),
        }

        let mut files = WalkedFiles::default();
        for entry in builder.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(target: "indexer", "skipping unreadable entry under {}: {e}", root.display());
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.into_path();
            if self.config.is_source(&path) {
                files.sources.push(path);
            } else if self.config.is_header(&path) {
                files.headers.push(path);
            }
        }
        files.sources.sort();
        files.headers.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn walker() -> FileWalker {
        FileWalker::new(&IndexingConfig::default())
    }

    #[test]
    fn test_walk_splits_sources_and_headers() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("src")).unwrap();
        fs::write(root.join("src/main.cpp"), "int main() {}").unwrap();
        fs::write(root.join("src/util.c"), "void util() {}").unwrap();
        fs::write(root.join("src/util.h"), "void util();").unwrap();
        fs::write(root.join("README.md"), "# Test").unwrap();

        let files = walker().walk(root).unwrap();
        assert_eq!(files.sources, vec![root.join("src/main.cpp"), root.join("src/util.c")]);
        assert_eq!(files.headers, vec![root.join("src/util.h")]);
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn test_hidden_and_ignored_files_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join(".hidden.cpp"), "").unwrap();
        fs::create_dir(root.join("build")).unwrap();
        fs::write(root.join("build/gen.cpp"), "").unwrap();
        fs::write(root.join(".gitignore"), "skipped.cpp\n").unwrap();
        fs::write(root.join("skipped.cpp"), "").unwrap();
        fs::write(root.join(IGNORE_FILE), "legacy/\n").unwrap();
        fs::create_dir(root.join("legacy")).unwrap();
        fs::write(root.join("legacy/old.cpp"), "").unwrap();
        fs::write(root.join("kept.cpp"), "").unwrap();

        let files = walker().walk(root).unwrap();
        assert_eq!(files.sources, vec![root.join("kept.cpp")]);
        assert!(files.headers.is_empty());
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(walker().walk(&temp_dir.path().join("gone")).is_err());
    }
}
