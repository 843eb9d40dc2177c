//! Archive serializer.
//!
//! Writes snapshot entries as a GNU tar stream with normalized metadata:
//! modification times are pinned to the Unix epoch and access/change times
//! are left unset, so identical snapshots always produce identical bytes.

use std::fmt;
use std::io::{self, Write};

use tar::{Builder, EntryType, Header};
use thiserror::Error;
use tracing::{debug, trace};

use super::ordering::ordered_entries;
use crate::fs::{EntryKind, FilesystemEntry, ROOT_PATH, Snapshot};

/// Modification time written for every entry.
pub const NORMALIZED_MTIME: u64 = 0;

const BLOCK_SIZE: usize = 512;

/// Which part of an entry was being written when the sink failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    Header,
    Data,
}

impl fmt::Display for WritePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WritePhase::Header => write!(f, "header"),
            WritePhase::Data => write!(f, "data"),
        }
    }
}

/// Errors that can occur while serializing a snapshot.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to write {phase} for {path}: {source}")]
    Serialization {
        path: String,
        phase: WritePhase,
        #[source]
        source: io::Error,
    },

    #[error("failed to finish archive: {0}")]
    ArchiveFinish(#[source] io::Error),
}

/// Result type for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Streams snapshot entries into a tar sink.
///
/// Bytes already handed to the sink are never retracted; after an error the
/// partial output must be treated as unusable.
pub struct ArchiveSerializer<W: Write> {
    builder: Builder<W>,
    entries_written: usize,
}

impl<W: Write> ArchiveSerializer<W> {
    pub fn new(sink: W) -> Self {
        Self { builder: Builder::new(sink), entries_written: 0 }
    }

    pub fn entries_written(&self) -> usize {
        self.entries_written
    }

    /// Write one entry: its header, then its content for non-empty regular
    /// files.
    pub fn write_entry(&mut self, entry: &FilesystemEntry) -> ArchiveResult<()> {
        let err = |phase: WritePhase, source: io::Error| ArchiveError::Serialization {
            path: entry.path.clone(),
            phase,
            source,
        };

        let mut header = build_header(entry).map_err(|e| err(WritePhase::Header, e))?;
        let name = archive_name(entry);

        let target = entry.metadata.link_target.as_deref().filter(|t| !t.is_empty());
        let written = match target {
            Some(target) if entry.kind.is_link() => {
                self.builder.append_link(&mut header, &name, target)
            }
            _ => self.builder.append_data(&mut header, &name, io::empty()),
        };
        written.map_err(|e| err(WritePhase::Header, e))?;

        if entry.kind == EntryKind::Regular
            && let Some(content) = entry.content.as_deref()
            && !content.is_empty()
        {
            write_padded(self.builder.get_mut(), content).map_err(|e| err(WritePhase::Data, e))?;
        }

        self.entries_written += 1;
        trace!(path = %entry.path, kind = entry.kind.as_str(), "Wrote archive entry");

        Ok(())
    }

    /// Write every entry of a snapshot in extraction-safe order.
    pub fn write_snapshot(&mut self, snapshot: &Snapshot) -> ArchiveResult<usize> {
        let entries = ordered_entries(snapshot);
        for entry in &entries {
            self.write_entry(entry)?;
        }
        Ok(entries.len())
    }

    /// Write the end-of-archive marker and return the sink.
    pub fn finish(self) -> ArchiveResult<W> {
        let entries_written = self.entries_written;
        let sink = self.builder.into_inner().map_err(ArchiveError::ArchiveFinish)?;
        debug!(entries = entries_written, "Finished archive");
        Ok(sink)
    }
}

/// Serialize a whole snapshot into `sink` and return the sink.
pub fn write_snapshot<W: Write>(snapshot: &Snapshot, sink: W) -> ArchiveResult<W> {
    let mut serializer = ArchiveSerializer::new(sink);
    serializer.write_snapshot(snapshot)?;
    serializer.finish()
}

/// Name an entry is written under. Directories carry a trailing slash and the
/// root is written as `./`.
fn archive_name(entry: &FilesystemEntry) -> String {
    if entry.path == ROOT_PATH {
        "./".to_string()
    } else if entry.is_dir() {
        format!("{}/", entry.path)
    } else {
        entry.path.clone()
    }
}

fn build_header(entry: &FilesystemEntry) -> io::Result<Header> {
    let metadata = &entry.metadata;

    let mut header = Header::new_gnu();
    header.set_entry_type(output_entry_type(entry));
    header.set_mode(metadata.mode);
    header.set_uid(metadata.uid);
    header.set_gid(metadata.gid);
    header.set_mtime(NORMALIZED_MTIME);
    header.set_size(if entry.kind == EntryKind::Regular { entry.content_len() } else { 0 });

    if let Some(username) = &metadata.username {
        header.set_username(username)?;
    }
    if let Some(groupname) = &metadata.groupname {
        header.set_groupname(groupname)?;
    }
    if let Some(major) = metadata.device_major {
        header.set_device_major(major)?;
    }
    if let Some(minor) = metadata.device_minor {
        header.set_device_minor(minor)?;
    }

    clear_extended_times(&mut header);
    Ok(header)
}

/// Sparse content is held expanded, so it goes out without a sparse map.
fn output_entry_type(entry: &FilesystemEntry) -> EntryType {
    let entry_type = EntryType::new(entry.metadata.entry_type);
    if entry_type.is_gnu_sparse() { EntryType::Regular } else { entry_type }
}

fn clear_extended_times(header: &mut Header) {
    if let Some(gnu) = header.as_gnu_mut() {
        gnu.atime = [0; 12];
        gnu.ctime = [0; 12];
    }
}

fn write_padded<W: Write>(sink: &mut W, content: &[u8]) -> io::Result<()> {
    sink.write_all(content)?;
    let remainder = content.len() % BLOCK_SIZE;
    if remainder != 0 {
        sink.write_all(&[0; BLOCK_SIZE][..BLOCK_SIZE - remainder])?;
    }
    Ok(())
}
