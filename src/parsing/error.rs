//! Errors raised by translation-unit providers.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to initialize C++ grammar: {reason}")]
    LanguageInit { reason: String },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parser produced no tree for {path}")]
    NoTree { path: PathBuf },

    #[error("Parsing of {path} was cancelled")]
    Cancelled { path: PathBuf },
}

pub type ParseResult<T> = Result<T, ParseError>;
