//! In-memory flattened filesystem.

use std::collections::HashMap;
use std::collections::hash_map::Values;

use super::entry::FilesystemEntry;
use super::path::is_within;

/// Mapping from normalized path to the final entry at that path.
///
/// Inserting at an existing path replaces the previous entry wholesale;
/// metadata is never merged.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: HashMap<String, FilesystemEntry>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&FilesystemEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Insert an entry, returning the one it replaced.
    pub fn insert(&mut self, entry: FilesystemEntry) -> Option<FilesystemEntry> {
        self.entries.insert(entry.path.clone(), entry)
    }

    pub fn remove(&mut self, path: &str) -> Option<FilesystemEntry> {
        self.entries.remove(path)
    }

    /// Remove `path` and everything beneath it, except paths for which
    /// `keep` returns true. Returns the number of entries removed.
    pub fn remove_subtree<F>(&mut self, path: &str, keep: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        self.remove_matching(|p| p == path || is_within(p, path), keep)
    }

    /// Remove every entry strictly inside `dir`, leaving `dir` itself, except
    /// paths for which `keep` returns true. Returns the number removed.
    pub fn clear_children<F>(&mut self, dir: &str, keep: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        self.remove_matching(|p| is_within(p, dir), keep)
    }

    fn remove_matching<M, F>(&mut self, matches: M, keep: F) -> usize
    where
        M: Fn(&str) -> bool,
        F: Fn(&str) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|path, _| !matches(path) || keep(path));
        before - self.entries.len()
    }

    /// Iterate over entries in arbitrary order.
    pub fn entries(&self) -> Values<'_, String, FilesystemEntry> {
        self.entries.values()
    }

    /// Iterate over paths in arbitrary order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Sum of stored content lengths.
    pub fn content_bytes(&self) -> u64 {
        self.entries.values().map(FilesystemEntry::content_len).sum()
    }
}
