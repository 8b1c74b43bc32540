use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::path::PathBuf;

/// Dense, index-assigned identifier of a physical file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(NonZeroU32);

impl FileId {
    pub fn new(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(Self)
    }

    pub fn value(&self) -> u32 {
        self.0.get()
    }

    /// Convert to the underlying u32 value
    pub fn to_u32(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of symbol fact stored in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntryType {
    Class,
    Struct,
    Union,
    FwdClass,
    FwdStruct,
    FwdUnion,
    Enum,
    Enumerator,
    Typedef,
    Namespace,
    Field,
    Var,
    Method,
    Function,
    Derived,
    Friend,
}

impl EntryType {
    pub const ALL: [EntryType; 16] = [
        EntryType::Class,
        EntryType::Struct,
        EntryType::Union,
        EntryType::FwdClass,
        EntryType::FwdStruct,
        EntryType::FwdUnion,
        EntryType::Enum,
        EntryType::Enumerator,
        EntryType::Typedef,
        EntryType::Namespace,
        EntryType::Field,
        EntryType::Var,
        EntryType::Method,
        EntryType::Function,
        EntryType::Derived,
        EntryType::Friend,
    ];

    /// Stable wire tag used by the on-disk format.
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// True for CLASS and STRUCT, the kinds that carry base and friend lists.
    pub fn has_hierarchy(self) -> bool {
        matches!(self, EntryType::Class | EntryType::Struct)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryType::Class => "class",
            EntryType::Struct => "struct",
            EntryType::Union => "union",
            EntryType::FwdClass => "fwd-class",
            EntryType::FwdStruct => "fwd-struct",
            EntryType::FwdUnion => "fwd-union",
            EntryType::Enum => "enum",
            EntryType::Enumerator => "enumerator",
            EntryType::Typedef => "typedef",
            EntryType::Namespace => "namespace",
            EntryType::Field => "field",
            EntryType::Var => "var",
            EntryType::Method => "method",
            EntryType::Function => "function",
            EntryType::Derived => "derived",
            EntryType::Friend => "friend",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of an indexed occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LimitTo {
    Declaration,
    Reference,
    Unknown,
}

impl LimitTo {
    pub fn tag(self) -> u8 {
        match self {
            LimitTo::Declaration => 0,
            LimitTo::Reference => 1,
            LimitTo::Unknown => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(LimitTo::Declaration),
            1 => Some(LimitTo::Reference),
            2 => Some(LimitTo::Unknown),
            _ => None,
        }
    }
}

/// Fully-qualified name as an ordered list of segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QualifiedName(Vec<Box<str>>);

impl QualifiedName {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Box<str>>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse a `::`-separated name. Empty segments are dropped.
    pub fn parse(text: &str) -> Self {
        Self::new(text.split("::").filter(|s| !s.is_empty()))
    }

    pub fn simple(name: &str) -> Self {
        Self(vec![name.into()])
    }

    pub fn segments(&self) -> &[Box<str>] {
        &self.0
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(|s| s.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Segment-wise prefix test: `a::b` starts with `a`, not with `a::bc`.
    pub fn starts_with(&self, prefix: &QualifiedName) -> bool {
        self.0.len() >= prefix.0.len() && self.0.iter().zip(&prefix.0).all(|(a, b)| a == b)
    }

    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// The first `len` segments.
    pub fn prefix(&self, len: usize) -> Self {
        Self(self.0[..len.min(self.0.len())].to_vec())
    }

    pub fn parent(&self) -> Option<Self> {
        (!self.0.is_empty()).then(|| self.prefix(self.0.len() - 1))
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("::")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

/// File attribution stored with every entry: owning file plus header bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexFlag {
    pub file_id: FileId,
    /// The file lives outside the workspace.
    pub external: bool,
    /// The header was already encountered by an earlier translation unit.
    pub visited_header: bool,
}

impl IndexFlag {
    pub fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            external: false,
            visited_header: false,
        }
    }

    pub fn with_external(mut self, external: bool) -> Self {
        self.external = external;
        self
    }

    pub fn with_visited_header(mut self, visited: bool) -> Self {
        self.visited_header = visited;
        self
    }

    const EXTERNAL_BIT: u8 = 0b01;
    const VISITED_BIT: u8 = 0b10;

    pub(crate) fn bits(&self) -> u8 {
        let mut bits = 0;
        if self.external {
            bits |= Self::EXTERNAL_BIT;
        }
        if self.visited_header {
            bits |= Self::VISITED_BIT;
        }
        bits
    }

    pub(crate) fn from_parts(file_id: FileId, bits: u8) -> Self {
        Self {
            file_id,
            external: bits & Self::EXTERNAL_BIT != 0,
            visited_header: bits & Self::VISITED_BIT != 0,
        }
    }
}

/// One physical file known to the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFile {
    pub file_id: FileId,
    /// Workspace-relative path for local files, absolute path for external ones.
    pub path: PathBuf,
    /// Modification stamp (ms since epoch) captured when the file was last indexed.
    pub stamp: Option<u64>,
}

/// One symbol fact.
///
/// `DERIVED` and `FRIEND` entries are keyed by the base (resp. friended)
/// class name and carry the related class in `related`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: QualifiedName,
    pub entry_type: EntryType,
    pub limit_to: LimitTo,
    pub related: Option<QualifiedName>,
}

impl IndexEntry {
    pub fn new(name: QualifiedName, entry_type: EntryType, limit_to: LimitTo) -> Self {
        Self {
            name,
            entry_type,
            limit_to,
            related: None,
        }
    }

    pub fn with_related(mut self, related: QualifiedName) -> Self {
        self.related = Some(related);
        self
    }
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({:?})", self.entry_type, self.name, self.limit_to)?;
        if let Some(related) = &self.related {
            write!(f, " -> {related}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_creation() {
        assert!(FileId::new(0).is_none());

        let id = FileId::new(100).unwrap();
        assert_eq!(id.value(), 100);
    }

    #[test]
    fn test_entry_type_tags_are_stable() {
        for (i, kind) in EntryType::ALL.iter().enumerate() {
            assert_eq!(kind.tag() as usize, i);
            assert_eq!(EntryType::from_tag(kind.tag()), Some(*kind));
        }
        assert_eq!(EntryType::from_tag(16), None);
    }

    #[test]
    fn test_qualified_name_parse_and_display() {
        let name = QualifiedName::parse("ns::inner::Foo");
        assert_eq!(name.len(), 3);
        assert_eq!(name.last(), Some("Foo"));
        assert_eq!(name.to_string(), "ns::inner::Foo");
        assert_eq!(QualifiedName::parse("::Foo").segments().len(), 1);
    }

    #[test]
    fn test_qualified_name_prefix_is_segment_wise() {
        let name = QualifiedName::parse("a::bc::d");
        assert!(name.starts_with(&QualifiedName::parse("a")));
        assert!(name.starts_with(&QualifiedName::parse("a::bc")));
        assert!(!name.starts_with(&QualifiedName::parse("a::b")));
    }

    #[test]
    fn test_index_flag_bits() {
        let id = FileId::new(3).unwrap();
        let flag = IndexFlag::new(id).with_external(true);
        let back = IndexFlag::from_parts(id, flag.bits());
        assert_eq!(back, flag);
        assert!(!back.visited_header);
    }
}
