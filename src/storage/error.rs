use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Index file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Index file {path} has format version {found}, expected {expected}")]
    VersionMismatch {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("Checksum mismatch in {path}")]
    ChecksumMismatch { path: PathBuf },

    #[error("Index for {0} was dropped and must be rebuilt")]
    Dropped(PathBuf),

    #[error("Unknown file id {0}")]
    UnknownFile(u32),

    #[error("File id space exhausted")]
    FileIdOverflow,

    #[error("Metadata error: {0}")]
    Metadata(String),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StorageError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True when the backing file cannot be trusted and should be rebuilt.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StorageError::Corrupt { .. }
                | StorageError::VersionMismatch { .. }
                | StorageError::ChecksumMismatch { .. }
        )
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
