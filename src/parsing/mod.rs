//! Translation-unit providers.
//!
//! The indexer never parses C++ itself; it asks a [`TranslationUnitParser`]
//! for a unit whose names are already resolved to bindings. [`CppParser`]
//! is the built-in provider on tree-sitter-cpp.

pub mod cpp;
pub mod error;

pub use cpp::CppParser;
pub use error::{ParseError, ParseResult};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ast::TranslationUnit;

/// Source text handed to a provider, either read from disk or supplied by
/// an editor buffer.
#[derive(Debug, Clone)]
pub struct SourceBuffer {
    pub path: PathBuf,
    pub contents: Arc<str>,
}

impl SourceBuffer {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<Arc<str>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }

    pub fn read(path: &Path) -> ParseResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ParseError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(path, contents))
    }
}

/// Where quoted and angle-bracket includes are looked up.
#[derive(Debug, Clone, Default)]
pub struct SearchPathConfig {
    pub include_paths: Vec<PathBuf>,
    pub follow_includes: bool,
}

impl SearchPathConfig {
    pub fn new(include_paths: Vec<PathBuf>) -> Self {
        Self {
            include_paths,
            follow_includes: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParseOutcome {
    /// `None` when the provider could not build a unit at all.
    pub unit: Option<TranslationUnit>,
    /// Syntax errors were recovered from; the unit may be partial.
    pub had_errors: bool,
}

pub trait TranslationUnitParser: Send + Sync {
    fn parse(&self, source: &SourceBuffer, search: &SearchPathConfig) -> ParseResult<ParseOutcome>;
}
