//! Configuration for the indexer.
//!
//! Layered with `figment`:
//! - Default values
//! - `.ccindex/settings.toml`, found by walking up from the current directory
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `CCI_` and use double
//! underscores to separate nested levels:
//! - `CCI_INDEXING__MAX_JOB_RETRIES=5` sets `indexing.max_job_retries`
//! - `CCI_WATCHER__DEBOUNCE_MS=200` sets `watcher.debounce_ms`
//! - `CCI_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{IndexError, IndexResult};

const CONFIG_DIR: &str = ".ccindex";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "CCI_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding the index files and their registry
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Workspace root; projects are its immediate subdirectories
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexingConfig {
    /// Master switch; when off no job is scheduled for any project
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Project directory names excluded from indexing
    #[serde(default)]
    pub disabled_projects: Vec<String>,

    /// Extensions of translation units (without the dot)
    #[serde(default = "default_source_extensions")]
    pub source_extensions: Vec<String>,

    /// Extensions treated as headers
    #[serde(default = "default_header_extensions")]
    pub header_extensions: Vec<String>,

    /// Gitignore-style patterns excluded from project walks
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Add-file jobs preload their contents while fewer jobs than this are pending
    #[serde(default = "default_preload_backlog_limit")]
    pub preload_backlog_limit: usize,

    /// Idle time after which dirty indexes are saved
    #[serde(default = "default_idle_save_threshold_ms")]
    pub idle_save_threshold_ms: u64,

    /// How often the idle worker checks for pending saves
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,

    /// Re-enqueue attempts for a job that reports failure
    #[serde(default = "default_max_job_retries")]
    pub max_job_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Skip headers already indexed through another translation unit
    #[serde(default = "default_true")]
    pub check_encountered_headers: bool,

    /// Log unresolved names found while indexing
    #[serde(default = "default_false")]
    pub report_problems: bool,

    /// Follow `#include` directives into headers
    #[serde(default = "default_true")]
    pub follow_includes: bool,

    /// Extra include directories searched after the including file's directory
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatcherConfig {
    #[serde(default = "default_false")]
    pub enabled: bool,

    /// Quiet period before a burst of file events is delivered
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Level for everything without a module override
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `jobs = "debug"`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

// Default value functions
fn default_version() -> u32 { 1 }
fn default_index_path() -> PathBuf { PathBuf::from(".ccindex/index") }
fn default_true() -> bool { true }
fn default_false() -> bool { false }
fn default_preload_backlog_limit() -> usize { 64 }
fn default_idle_save_threshold_ms() -> u64 { 2_000 }
fn default_idle_poll_ms() -> u64 { 250 }
fn default_max_job_retries() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 100 }
fn default_debounce_ms() -> u64 { 500 }
fn default_log_level() -> String { "warn".to_string() }

fn default_source_extensions() -> Vec<String> {
    ["c", "cc", "cpp", "cxx", "c++"].iter().map(|s| s.to_string()).collect()
}

fn default_header_extensions() -> Vec<String> {
    ["h", "hh", "hpp", "hxx", "h++", "inl"].iter().map(|s| s.to_string()).collect()
}

fn default_ignore_patterns() -> Vec<String> {
    vec![
        "build/**".to_string(),
        "cmake-build-*/**".to_string(),
        ".git/**".to_string(),
        "*.generated.*".to_string(),
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            workspace_root: None,
            indexing: IndexingConfig::default(),
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disabled_projects: Vec::new(),
            source_extensions: default_source_extensions(),
            header_extensions: default_header_extensions(),
            ignore_patterns: default_ignore_patterns(),
            preload_backlog_limit: default_preload_backlog_limit(),
            idle_save_threshold_ms: default_idle_save_threshold_ms(),
            idle_poll_ms: default_idle_poll_ms(),
            max_job_retries: default_max_job_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            check_encountered_headers: true,
            report_problems: false,
            follow_includes: true,
            include_paths: Vec::new(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

impl IndexingConfig {
    fn has_extension(path: &Path, extensions: &[String]) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }

    pub fn is_source(&self, path: &Path) -> bool {
        Self::has_extension(path, &self.source_extensions)
    }

    pub fn is_header(&self, path: &Path) -> bool {
        Self::has_extension(path, &self.header_extensions)
    }

    /// Sources and headers both produce index entries.
    pub fn is_indexable(&self, path: &Path) -> bool {
        self.is_source(path) || self.is_header(path)
    }

    pub fn is_project_enabled(&self, project: &Path) -> bool {
        if !self.enabled {
            return false;
        }
        let name = project.file_name().map(|n| n.to_string_lossy());
        !name.is_some_and(|name| self.disabled_projects.iter().any(|d| *d == *name))
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> IndexResult<Self> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        Self::figment(&config_path)
            .extract()
            .map_err(|e| IndexError::Config(e.to_string()))
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file plus the environment
    pub fn load_from(path: impl AsRef<Path>) -> IndexResult<Self> {
        Self::figment(path.as_ref())
            .extract()
            .map_err(|e| IndexError::Config(e.to_string()))
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels; single underscores
            // stay inside field names.
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
    }

    /// Find `.ccindex/settings.toml` in the current directory or an ancestor
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Directory containing `.ccindex`, searching from the current directory up
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Index directory, resolved against the workspace root when relative
    pub fn resolved_index_path(&self) -> PathBuf {
        match (&self.workspace_root, self.index_path.is_relative()) {
            (Some(root), true) => root.join(&self.index_path),
            _ => self.index_path.clone(),
        }
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> IndexResult<()> {
        let path = path.as_ref();
        let parent = path
            .parent()
            .ok_or_else(|| IndexError::Config(format!("invalid config path {}", path.display())))?;
        std::fs::create_dir_all(parent)?;

        let toml_string =
            toml::to_string_pretty(self).map_err(|e| IndexError::Config(e.to_string()))?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Write a default settings file under `workspace_root/.ccindex`
    pub fn init_config_file(workspace_root: &Path, force: bool) -> IndexResult<PathBuf> {
        let config_path = workspace_root.join(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err(IndexError::Config(format!(
                "configuration file {} already exists",
                config_path.display()
            )));
        }

        let settings = Settings {
            workspace_root: Some(workspace_root.to_path_buf()),
            ..Settings::default()
        };
        settings.save(&config_path)?;
        crate::log_event!("config", "created", "{}", config_path.display());
        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.index_path, PathBuf::from(".ccindex/index"));
        assert!(settings.indexing.enabled);
        assert!(settings.indexing.check_encountered_headers);
        assert_eq!(settings.logging.default, "warn");
        assert!(!settings.watcher.enabled);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[indexing]
max_job_retries = 7
ignore_patterns = ["third_party/**"]
disabled_projects = ["vendor"]

[watcher]
enabled = true
debounce_ms = 50

[logging]
default = "info"

[logging.modules]
jobs = "debug"
"#;
        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(settings.indexing.max_job_retries, 7);
        // Default ignore patterns are replaced, not merged
        assert_eq!(settings.indexing.ignore_patterns, vec!["third_party/**"]);
        assert!(settings.watcher.enabled);
        assert_eq!(settings.watcher.debounce_ms, 50);
        assert_eq!(settings.logging.default, "info");
        assert_eq!(settings.logging.modules["jobs"], "debug");
        assert!(!settings.indexing.is_project_enabled(Path::new("/ws/vendor")));
        assert!(settings.indexing.is_project_enabled(Path::new("/ws/app")));
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[indexing]\nreport_problems = true\n").unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert!(settings.indexing.report_problems);
        assert_eq!(settings.indexing.retry_delay_ms, 100);
        assert!(!settings.indexing.source_extensions.is_empty());
        assert_eq!(settings.watcher.debounce_ms, 500);
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.indexing.preload_backlog_limit = 8;
        settings.indexing.include_paths = vec![PathBuf::from("/opt/include")];
        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.indexing.preload_backlog_limit, 8);
        assert_eq!(loaded.indexing.include_paths, vec![PathBuf::from("/opt/include")]);
    }

    #[test]
    fn test_init_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = Settings::init_config_file(temp_dir.path(), false).unwrap();
        assert!(path.exists());
        assert!(Settings::init_config_file(temp_dir.path(), false).is_err());
        assert!(Settings::init_config_file(temp_dir.path(), true).is_ok());

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.workspace_root.as_deref(), Some(temp_dir.path()));
        assert_eq!(loaded.resolved_index_path(), temp_dir.path().join(".ccindex/index"));
    }

    #[test]
    fn test_file_classification() {
        let config = IndexingConfig::default();
        assert!(config.is_source(Path::new("a.cpp")));
        assert!(config.is_source(Path::new("a.CC")));
        assert!(config.is_header(Path::new("a.hpp")));
        assert!(!config.is_header(Path::new("a.cpp")));
        assert!(!config.is_indexable(Path::new("README.md")));
        assert!(!config.is_indexable(Path::new("Makefile")));
    }
}
