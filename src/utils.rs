//! Common utilities shared across modules.

use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};

/// Get current UTC timestamp in seconds since UNIX_EPOCH.
pub fn get_utc_timestamp() -> u64 {
    Utc::now().timestamp() as u64
}

/// Modification stamp of a file in milliseconds since UNIX_EPOCH.
///
/// `None` when the file is missing or the platform has no mtime.
pub fn file_stamp(path: &Path) -> Option<u64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let datetime: DateTime<Utc> = modified.into();
    u64::try_from(datetime.timestamp_millis()).ok()
}

/// Lexically normalize a path: drop `.` segments and fold `..` into the parent.
///
/// Does not touch the file system, so it works for paths that no longer exist.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
