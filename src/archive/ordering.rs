//! Extraction-safe entry ordering.
//!
//! Directories come first, shallowest first, so every parent precedes its
//! descendants. Regular files and other non-link entries follow, then
//! symlinks and hardlinks. Links are only guaranteed to come after every
//! regular file, not after their specific target.

use std::cmp::Ordering;

use crate::fs::path::depth;
use crate::fs::{EntryKind, FilesystemEntry, Snapshot};

/// Write priority of an entry kind; lower values are written first.
pub fn kind_priority(kind: EntryKind) -> u8 {
    match kind {
        EntryKind::Directory => 1,
        EntryKind::Regular | EntryKind::Other => 2,
        EntryKind::Symlink | EntryKind::Hardlink => 3,
    }
}

/// Total order over snapshot entries.
pub fn compare_entries(a: &FilesystemEntry, b: &FilesystemEntry) -> Ordering {
    kind_priority(a.kind)
        .cmp(&kind_priority(b.kind))
        .then_with(|| {
            if a.is_dir() && b.is_dir() {
                depth(&a.path).cmp(&depth(&b.path))
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| a.path.cmp(&b.path))
}

/// Entries of a snapshot in archive order.
pub fn ordered_entries(snapshot: &Snapshot) -> Vec<&FilesystemEntry> {
    let mut entries: Vec<&FilesystemEntry> = snapshot.entries().collect();
    entries.sort_by(|a, b| compare_entries(a, b));
    entries
}
