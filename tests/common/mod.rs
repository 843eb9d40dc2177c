//! Helpers for building layer archives in memory.

#![allow(dead_code)]

use tar::{Builder, EntryType, Header};

/// Builder for one in-memory layer tar stream.
pub struct LayerBuilder {
    builder: Builder<Vec<u8>>,
}

impl LayerBuilder {
    pub fn new() -> Self {
        Self { builder: Builder::new(Vec::new()) }
    }

    pub fn dir(mut self, path: &str) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        self.builder.append_data(&mut header, path, std::io::empty()).unwrap();
        self
    }

    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(data.len() as u64);
        header.set_mtime(1_700_000_000);
        self.builder.append_data(&mut header, path, data).unwrap();
        self
    }

    pub fn symlink(mut self, path: &str, target: &str) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_mode(0o777);
        header.set_size(0);
        self.builder.append_link(&mut header, path, target).unwrap();
        self
    }

    pub fn hardlink(mut self, path: &str, target: &str) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Link);
        header.set_mode(0o644);
        header.set_size(0);
        self.builder.append_link(&mut header, path, target).unwrap();
        self
    }

    /// Regular file whose header carries only its type, name and size.
    pub fn bare_file(mut self, path: &str, data: &[u8]) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        self.builder.append_data(&mut header, path, data).unwrap();
        self
    }

    /// GNU sparse file with one data block at `offset` and a trailing hole up
    /// to `real_size`.
    pub fn sparse(mut self, path: &str, offset: u64, block: &[u8], real_size: u64) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::GNUSparse);
        header.set_mode(0o644);
        header.set_size(block.len() as u64);
        let gnu = header.as_gnu_mut().unwrap();
        gnu.set_real_size(real_size);
        gnu.sparse[0].set_offset(offset);
        gnu.sparse[0].set_length(block.len() as u64);
        gnu.sparse[1].set_offset(real_size);
        gnu.sparse[1].set_length(0);
        self.builder.append_data(&mut header, path, block).unwrap();
        self
    }

    /// Entry whose name is stored as-is, bypassing the builder's path checks.
    pub fn raw_name(mut self, name: &str, data: &[u8]) -> Self {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(data.len() as u64);
        header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_cksum();
        self.builder.append(&header, data).unwrap();
        self
    }

    pub fn whiteout(self, dir: &str, name: &str) -> Self {
        let path = if dir.is_empty() { format!(".wh.{}", name) } else { format!("{}/.wh.{}", dir, name) };
        self.file(&path, b"")
    }

    pub fn opaque(self, dir: &str) -> Self {
        let path = if dir.is_empty() { ".wh..wh..opq".to_string() } else { format!("{}/.wh..wh..opq", dir) };
        self.file(&path, b"")
    }

    pub fn build(self) -> Vec<u8> {
        self.builder.into_inner().unwrap()
    }
}

/// Read an archive back as (name, type, data) triples in stream order.
pub fn read_archive(bytes: &[u8]) -> Vec<(String, EntryType, Vec<u8>)> {
    use std::io::Read;

    let mut archive = tar::Archive::new(bytes);
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let entry_type = entry.header().entry_type();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (name, entry_type, data)
        })
        .collect()
}
