//! On-disk codec for one index file.
//!
//! ```text
//! "CCIX" | u32 version | body | sha256(magic..body)
//!
//! body:
//!   u8 has_saved, u64 last_saved
//!   u32 next_file_id
//!   u32 file_count   { u32 id, u8 has_stamp, u64 stamp, bytes path }
//!   u32 entry_count  { u32 file_id, u8 flag_bits, u8 type, u8 limit_to,
//!                      name, u8 has_related, name related }
//! name: u16 segment_count { str }
//! str:  u32 len, utf-8 bytes
//! bytes: u32 len, raw OS path bytes
//! ```
//!
//! All integers are little endian. Saves go to `<file>.tmp` and are renamed
//! over the previous file, so a crash mid-save leaves the old file intact.

use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::error::{StorageError, StorageResult};
use super::index::{Index, StoredEntry};
use crate::types::{EntryType, FileId, IndexEntry, IndexFlag, IndexedFile, LimitTo, QualifiedName};

pub const MAGIC: &[u8; 4] = b"CCIX";
pub const FORMAT_VERSION: u32 = 2;
const CHECKSUM_LEN: usize = 32;
const HEADER_LEN: usize = 8;

pub fn encode(index: &Index) -> Vec<u8> {
    let mut out = Vec::with_capacity(4096);
    out.extend_from_slice(MAGIC);
    put_u32(&mut out, FORMAT_VERSION);

    match index.last_saved() {
        Some(ts) => {
            out.push(1);
            put_u64(&mut out, ts);
        }
        None => {
            out.push(0);
            put_u64(&mut out, 0);
        }
    }
    put_u32(&mut out, index.next_file_id());

    put_u32(&mut out, index.file_count() as u32);
    for file in index.files() {
        put_u32(&mut out, file.file_id.value());
        out.push(u8::from(file.stamp.is_some()));
        put_u64(&mut out, file.stamp.unwrap_or(0));
        put_bytes(&mut out, path_bytes(&file.path));
    }

    put_u32(&mut out, index.entry_count() as u32);
    for stored in index.stored_entries() {
        put_u32(&mut out, stored.flag.file_id.value());
        out.push(stored.flag.bits());
        out.push(stored.entry.entry_type.tag());
        out.push(stored.entry.limit_to.tag());
        put_name(&mut out, &stored.entry.name);
        match &stored.entry.related {
            Some(related) => {
                out.push(1);
                put_name(&mut out, related);
            }
            None => out.push(0),
        }
    }

    let digest = Sha256::digest(&out);
    out.extend_from_slice(&digest);
    out
}

pub fn decode(bytes: &[u8], path: &Path) -> StorageResult<Index> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(StorageError::corrupt(path, "file too short"));
    }
    if &bytes[..4] != MAGIC {
        return Err(StorageError::corrupt(path, "bad magic"));
    }

    let (payload, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if Sha256::digest(payload).as_slice() != checksum {
        return Err(StorageError::ChecksumMismatch {
            path: path.to_path_buf(),
        });
    }

    let mut reader = Reader {
        bytes: payload,
        pos: 4,
        path,
    };
    let version = reader.u32()?;
    if version != FORMAT_VERSION {
        return Err(StorageError::VersionMismatch {
            path: path.to_path_buf(),
            found: version,
            expected: FORMAT_VERSION,
        });
    }

    let has_saved = reader.u8()? != 0;
    let saved = reader.u64()?;
    let last_saved = has_saved.then_some(saved);
    let next_file_id = reader.u32()?;

    let file_count = reader.u32()? as usize;
    let mut files = Vec::with_capacity(file_count.min(1 << 16));
    for _ in 0..file_count {
        let file_id = reader.file_id()?;
        let has_stamp = reader.u8()? != 0;
        let stamp = reader.u64()?;
        let file_path = reader.path()?;
        files.push(IndexedFile {
            file_id,
            path: file_path,
            stamp: has_stamp.then_some(stamp),
        });
    }

    let entry_count = reader.u32()? as usize;
    let mut entries = Vec::with_capacity(entry_count.min(1 << 20));
    for _ in 0..entry_count {
        let file_id = reader.file_id()?;
        let bits = reader.u8()?;
        let entry_type = EntryType::from_tag(reader.u8()?)
            .ok_or_else(|| StorageError::corrupt(path, "unknown entry type"))?;
        let limit_to = LimitTo::from_tag(reader.u8()?)
            .ok_or_else(|| StorageError::corrupt(path, "unknown limitTo"))?;
        let name = reader.name()?;
        let related = if reader.u8()? != 0 {
            Some(reader.name()?)
        } else {
            None
        };
        entries.push(StoredEntry {
            entry: IndexEntry {
                name,
                entry_type,
                limit_to,
                related,
            },
            flag: IndexFlag::from_parts(file_id, bits),
        });
    }

    if reader.pos != payload.len() {
        return Err(StorageError::corrupt(path, "trailing bytes"));
    }

    Index::from_parts(files, entries, next_file_id, last_saved).map_err(|e| match e {
        StorageError::UnknownFile(id) => {
            StorageError::corrupt(path, format!("entry references unknown file id {id}"))
        }
        StorageError::Metadata(reason) => StorageError::corrupt(path, reason),
        other => other,
    })
}

/// Read and decode the index stored at `path`.
pub fn read_index(path: &Path) -> StorageResult<Index> {
    let bytes = fs::read(path).map_err(|e| StorageError::io(path, e))?;
    decode(&bytes, path)
}

/// Encode `index` and atomically replace the file at `path`.
pub fn write_index(index: &Index, path: &Path) -> StorageResult<()> {
    let bytes = encode(index);
    let tmp = tmp_path(path);

    let result = (|| {
        let mut file = fs::File::create(&tmp).map_err(|e| StorageError::io(&tmp, e))?;
        file.write_all(&bytes).map_err(|e| StorageError::io(&tmp, e))?;
        file.sync_all().map_err(|e| StorageError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| StorageError::io(path, e))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_str(out: &mut Vec<u8>, value: &str) {
    put_bytes(out, value.as_bytes());
}

fn put_bytes(out: &mut Vec<u8>, value: &[u8]) {
    put_u32(out, value.len() as u32);
    out.extend_from_slice(value);
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> &[u8] {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> &[u8] {
    path.as_os_str().as_encoded_bytes()
}

#[cfg(unix)]
fn path_from_bytes(raw: &[u8]) -> Option<PathBuf> {
    use std::os::unix::ffi::OsStrExt;
    Some(PathBuf::from(OsStr::from_bytes(raw)))
}

#[cfg(not(unix))]
fn path_from_bytes(raw: &[u8]) -> Option<PathBuf> {
    std::str::from_utf8(raw).ok().map(|s| PathBuf::from(OsStr::new(s)))
}

fn put_name(out: &mut Vec<u8>, name: &QualifiedName) {
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    for segment in name.segments() {
        put_str(out, segment);
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl Reader<'_> {
    fn take(&mut self, len: usize) -> StorageResult<&[u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| StorageError::corrupt(self.path, "unexpected end of file"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> StorageResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> StorageResult<u16> {
        let raw = self.take(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self) -> StorageResult<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u64(&mut self) -> StorageResult<u64> {
        let raw = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    fn file_id(&mut self) -> StorageResult<FileId> {
        let raw = self.u32()?;
        FileId::new(raw).ok_or_else(|| StorageError::corrupt(self.path, "zero file id"))
    }

    fn string(&mut self) -> StorageResult<String> {
        let len = self.u32()? as usize;
        let path = self.path;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| StorageError::corrupt(path, "invalid utf-8"))
    }

    fn path(&mut self) -> StorageResult<PathBuf> {
        let len = self.u32()? as usize;
        let path = self.path;
        let raw = self.take(len)?;
        path_from_bytes(raw).ok_or_else(|| StorageError::corrupt(path, "undecodable file path"))
    }

    fn name(&mut self) -> StorageResult<QualifiedName> {
        let count = self.u16()? as usize;
        let mut segments = Vec::with_capacity(count);
        for _ in 0..count {
            segments.push(self.string()?);
        }
        Ok(QualifiedName::new(segments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_index() -> Index {
        let mut index = Index::new();
        let main = index.add_indexed_file(Path::new("/proj/b.cpp")).unwrap();
        let header = index.add_indexed_file(Path::new("/usr/include/a.h")).unwrap();
        index.set_file_stamp(main, Some(1_700_000_000_000));
        index
            .add_ref(
                IndexEntry::new(QualifiedName::parse("ns::B"), EntryType::Class, LimitTo::Declaration),
                IndexFlag::new(main),
            )
            .unwrap();
        index
            .add_ref(
                IndexEntry::new(QualifiedName::parse("A"), EntryType::Derived, LimitTo::Declaration)
                    .with_related(QualifiedName::parse("ns::B")),
                IndexFlag::new(main),
            )
            .unwrap();
        index
            .add_ref(
                IndexEntry::new(QualifiedName::parse("A"), EntryType::Class, LimitTo::Declaration),
                IndexFlag::new(header).with_external(true),
            )
            .unwrap();
        index.mark_saved(42);
        index
    }

    #[test]
    fn test_write_then_read_preserves_index() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("p.index");
        let index = sample_index();

        write_index(&index, &path).unwrap();
        let loaded = read_index(&path).unwrap();

        assert_eq!(loaded.file_count(), 2);
        assert_eq!(loaded.entry_count(), 3);
        assert_eq!(loaded.last_saved(), Some(42));
        assert_eq!(
            loaded
                .get_indexed_file(Path::new("/proj/b.cpp"))
                .unwrap()
                .stamp,
            Some(1_700_000_000_000)
        );
        assert_eq!(
            loaded.derived_classes(&QualifiedName::parse("A")),
            vec![QualifiedName::parse("ns::B")]
        );
        let external: Vec<_> = loaded.stored_entries().filter(|s| s.flag.external).collect();
        assert_eq!(external.len(), 1);
        assert!(!loaded.is_dirty());
        assert!(!temp_dir.path().join("p.index.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_path_survives_reload() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let temp_dir = TempDir::new().unwrap();
        let location = temp_dir.path().join("p.index");
        let raw = PathBuf::from(OsString::from_vec(b"app/caf\xE9.cpp".to_vec()));

        let mut index = Index::new();
        let id = index.add_indexed_file(&raw).unwrap();
        write_index(&index, &location).unwrap();

        let mut loaded = read_index(&location).unwrap();
        assert_eq!(loaded.get_indexed_file(&raw).map(|f| f.file_id), Some(id));
        assert_eq!(loaded.add_indexed_file(&raw).unwrap(), id);
        assert_eq!(loaded.file_count(), 1);
    }

    #[test]
    fn test_flipped_byte_is_detected() {
        let mut bytes = encode(&sample_index());
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        let err = decode(&bytes, Path::new("x.index")).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let bytes = encode(&sample_index());
        let err = decode(&bytes[..10], Path::new("x.index")).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_version_mismatch_is_reported() {
        let mut bytes = encode(&sample_index());
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        let len = bytes.len();
        let digest = Sha256::digest(&bytes[..len - CHECKSUM_LEN]);
        bytes[len - CHECKSUM_LEN..].copy_from_slice(&digest);

        match decode(&bytes, Path::new("x.index")) {
            Err(StorageError::VersionMismatch { found, .. }) => assert_eq!(found, 99),
            other => panic!("expected version mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_rename_leaves_no_tmp_file() {
        let temp_dir = TempDir::new().unwrap();
        // A non-empty directory where the index file should go makes the rename fail.
        let path = temp_dir.path().join("p.index");
        fs::create_dir_all(path.join("blocker")).unwrap();

        let err = write_index(&sample_index(), &path).unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
        assert!(!temp_dir.path().join("p.index.tmp").exists());
    }
}
