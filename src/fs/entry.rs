//! Filesystem entries held by a snapshot.

use tar::EntryType;

/// Kind of a flattened filesystem entry.
///
/// Device nodes, FIFOs and unknown tar types collapse into [`EntryKind::Other`]
/// and never carry data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    Regular,
    Symlink,
    Hardlink,
    Other,
}

impl EntryKind {
    /// Classify a tar entry type.
    pub fn from_entry_type(entry_type: EntryType) -> Self {
        match entry_type {
            EntryType::Directory => EntryKind::Directory,
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => EntryKind::Regular,
            EntryType::Symlink => EntryKind::Symlink,
            EntryType::Link => EntryKind::Hardlink,
            _ => EntryKind::Other,
        }
    }

    /// Returns true for symlinks and hardlinks.
    pub fn is_link(&self) -> bool {
        matches!(self, EntryKind::Symlink | EntryKind::Hardlink)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Directory => "dir",
            EntryKind::Regular => "file",
            EntryKind::Symlink => "symlink",
            EntryKind::Hardlink => "hardlink",
            EntryKind::Other => "other",
        }
    }
}

/// Header metadata carried over from the layer that last wrote a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Permission bits (including setuid/setgid/sticky).
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub username: Option<String>,
    pub groupname: Option<String>,
    /// Size declared by the layer header.
    pub size: u64,
    /// Target of a symlink or hardlink.
    pub link_target: Option<String>,
    /// Raw tar type flag. The serializer re-emits it verbatim except for GNU
    /// sparse files, which are written out expanded as plain regular files.
    pub entry_type: u8,
    pub device_major: Option<u32>,
    pub device_minor: Option<u32>,
}

impl EntryMetadata {
    fn new(entry_type: EntryType, mode: u32) -> Self {
        Self {
            mode,
            uid: 0,
            gid: 0,
            username: None,
            groupname: None,
            size: 0,
            link_target: None,
            entry_type: entry_type.as_byte(),
            device_major: None,
            device_minor: None,
        }
    }
}

/// One final path in the flattened filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemEntry {
    /// Normalized relative path, `"."` for the root.
    pub path: String,
    pub kind: EntryKind,
    pub metadata: EntryMetadata,
    /// File content, present only for regular files with nonzero size.
    pub content: Option<Vec<u8>>,
}

impl FilesystemEntry {
    /// Create a directory entry.
    pub fn directory(path: impl Into<String>, mode: u32) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
            metadata: EntryMetadata::new(EntryType::Directory, mode),
            content: None,
        }
    }

    /// Create a regular file entry; empty content is stored as `None`.
    pub fn regular(path: impl Into<String>, mode: u32, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        let mut metadata = EntryMetadata::new(EntryType::Regular, mode);
        metadata.size = content.len() as u64;

        Self {
            path: path.into(),
            kind: EntryKind::Regular,
            metadata,
            content: if content.is_empty() { None } else { Some(content) },
        }
    }

    /// Create a symbolic link entry.
    pub fn symlink(path: impl Into<String>, target: impl Into<String>) -> Self {
        let mut metadata = EntryMetadata::new(EntryType::Symlink, 0o777);
        metadata.link_target = Some(target.into());

        Self { path: path.into(), kind: EntryKind::Symlink, metadata, content: None }
    }

    /// Create a hard link entry pointing at another archive path.
    pub fn hardlink(path: impl Into<String>, target: impl Into<String>) -> Self {
        let mut metadata = EntryMetadata::new(EntryType::Link, 0o644);
        metadata.link_target = Some(target.into());

        Self { path: path.into(), kind: EntryKind::Hardlink, metadata, content: None }
    }

    /// Create an entry of any other tar type (device, FIFO, ...).
    pub fn other(path: impl Into<String>, entry_type: EntryType, mode: u32) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Other,
            metadata: EntryMetadata::new(entry_type, mode),
            content: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Length of the stored content in bytes.
    pub fn content_len(&self) -> u64 {
        self.content.as_ref().map_or(0, |c| c.len() as u64)
    }
}
