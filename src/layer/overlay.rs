//! Layer overlay engine.
//!
//! Applies an ordered sequence of layer diffs (oldest first) to an empty
//! [`Snapshot`], reproducing union-filesystem semantics: later layers replace
//! earlier entries, and whiteout markers delete what lower layers provided.

use std::collections::HashSet;
use std::io::{self, Read};

use tar::{Archive, Entry, EntryType};
use thiserror::Error;
use tracing::{debug, trace};

use super::whiteout::{Whiteout, classify};
use crate::fs::{
    EntryKind, EntryMetadata, FilesystemEntry, Snapshot, has_parent_component, normalize_entry_path,
};

/// Errors that can occur while applying layers.
#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("failed to read layer {layer_index}: {source}")]
    LayerRead {
        layer_index: usize,
        #[source]
        source: io::Error,
    },

    #[error(
        "declared size exceeds available data for {path} in layer {layer_index}: expected {expected} bytes, got {actual}"
    )]
    IncompleteFileData { layer_index: usize, path: String, expected: u64, actual: u64 },
}

impl OverlayError {
    fn layer_read(layer_index: usize, source: io::Error) -> Self {
        OverlayError::LayerRead { layer_index, source }
    }

    /// Index of the layer that caused the error.
    pub fn layer_index(&self) -> usize {
        match self {
            OverlayError::LayerRead { layer_index, .. }
            | OverlayError::IncompleteFileData { layer_index, .. } => *layer_index,
        }
    }
}

/// Result type for overlay operations.
pub type OverlayResult<T> = Result<T, OverlayError>;

/// Counters for a single applied layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerStats {
    /// Ordinary entries inserted or replaced.
    pub entries: usize,
    /// Whiteout markers processed.
    pub whiteouts: usize,
    /// Snapshot entries removed by those markers.
    pub removed: usize,
}

/// Builds a snapshot by applying layers in order.
///
/// If [`apply_layer`](Self::apply_layer) fails the engine holds a partially
/// applied layer and must be discarded.
#[derive(Debug, Default)]
pub struct OverlayEngine {
    snapshot: Snapshot,
    layers_applied: usize,
}

impl OverlayEngine {
    /// Create an engine over an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of layers applied so far.
    pub fn layers_applied(&self) -> usize {
        self.layers_applied
    }

    /// Current state of the snapshot.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Consume the engine and return the flattened snapshot.
    pub fn finish(self) -> Snapshot {
        self.snapshot
    }

    /// Apply one layer diff stream.
    ///
    /// The stream is read to completion in order and dropped before this
    /// returns, on success and on error alike. Whiteouts only remove state
    /// contributed by earlier layers; entries already written by this layer
    /// survive, and later entries of this layer may recreate deleted paths.
    pub fn apply_layer<R: Read>(&mut self, layer_index: usize, reader: R) -> OverlayResult<LayerStats> {
        let mut archive = Archive::new(reader);
        let entries = archive.entries().map_err(|e| OverlayError::layer_read(layer_index, e))?;

        let mut written: HashSet<String> = HashSet::new();
        let mut stats = LayerStats::default();

        for entry in entries {
            let mut entry = entry.map_err(|e| OverlayError::layer_read(layer_index, e))?;
            // Global pax headers describe the archive, not a filesystem path.
            if entry.header().entry_type() == EntryType::XGlobalHeader {
                continue;
            }

            let path = normalize_entry_path(&String::from_utf8_lossy(&entry.path_bytes()));
            if has_parent_component(&path) {
                let message = format!("entry name {path} has a '..' component");
                return Err(OverlayError::layer_read(
                    layer_index,
                    io::Error::new(io::ErrorKind::InvalidData, message),
                ));
            }

            if let Some(whiteout) = classify(&path) {
                let removed = self.apply_whiteout(&whiteout, &written);
                trace!(layer_index, path = %whiteout.path(), removed, "Applied whiteout");
                stats.whiteouts += 1;
                stats.removed += removed;
                continue;
            }

            let fs_entry = read_entry(layer_index, path, &mut entry)?;
            written.insert(fs_entry.path.clone());
            self.snapshot.insert(fs_entry);
            stats.entries += 1;
        }

        self.layers_applied += 1;

        debug!(
            layer_index,
            entries = stats.entries,
            whiteouts = stats.whiteouts,
            removed = stats.removed,
            total = self.snapshot.len(),
            "Applied layer"
        );

        Ok(stats)
    }

    fn apply_whiteout(&mut self, whiteout: &Whiteout, written: &HashSet<String>) -> usize {
        let keep = |p: &str| written.contains(p);
        match whiteout {
            Whiteout::Opaque { dir } => self.snapshot.clear_children(dir, keep),
            Whiteout::Remove { target } => self.snapshot.remove_subtree(target, keep),
        }
    }
}

/// Apply every layer in order and return the flattened snapshot.
///
/// The first failing layer aborts the whole operation; no partial snapshot is
/// returned.
pub fn apply_layers<I, R>(layers: I) -> OverlayResult<Snapshot>
where
    I: IntoIterator<Item = R>,
    R: Read,
{
    let mut engine = OverlayEngine::new();
    for (index, layer) in layers.into_iter().enumerate() {
        engine.apply_layer(index, layer)?;
    }
    Ok(engine.finish())
}

/// A blank (all NUL or space) numeric header field reads as zero; anything
/// else must parse.
fn numeric_field<T: Default>(raw: &[u8], parsed: io::Result<T>) -> io::Result<T> {
    if raw.iter().all(|b| *b == 0 || *b == b' ') { Ok(T::default()) } else { parsed }
}

/// Build a snapshot entry from a tar entry, reading regular-file content.
fn read_entry<R: Read>(
    layer_index: usize,
    path: String,
    entry: &mut Entry<'_, R>,
) -> OverlayResult<FilesystemEntry> {
    let read_err = |e: io::Error| OverlayError::layer_read(layer_index, e);

    let header = entry.header();
    let entry_type = header.entry_type();
    let kind = EntryKind::from_entry_type(entry_type);

    let mut metadata = EntryMetadata {
        mode: numeric_field(&header.as_old().mode, header.mode()).map_err(read_err)?,
        uid: numeric_field(&header.as_old().uid, header.uid()).map_err(read_err)?,
        gid: numeric_field(&header.as_old().gid, header.gid()).map_err(read_err)?,
        username: header.username().ok().flatten().map(str::to_owned),
        groupname: header.groupname().ok().flatten().map(str::to_owned),
        size: 0,
        link_target: None,
        entry_type: entry_type.as_byte(),
        device_major: None,
        device_minor: None,
    };

    if kind == EntryKind::Other {
        metadata.device_major = header.device_major().ok().flatten();
        metadata.device_minor = header.device_minor().ok().flatten();
    }

    match kind {
        EntryKind::Symlink => {
            metadata.link_target =
                entry.link_name_bytes().map(|b| String::from_utf8_lossy(&b).into_owned());
        }
        // Hardlink targets name other archive members and share their keys.
        EntryKind::Hardlink => {
            metadata.link_target = entry
                .link_name_bytes()
                .map(|b| normalize_entry_path(&String::from_utf8_lossy(&b)));
        }
        _ => {}
    }

    let mut content = None;
    if kind == EntryKind::Regular {
        let expected = entry.size();
        metadata.size = expected;

        if expected > 0 {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(read_err)?;

            let actual = buf.len() as u64;
            if actual < expected {
                return Err(OverlayError::IncompleteFileData { layer_index, path, expected, actual });
            }
            content = Some(buf);
        }
    }

    Ok(FilesystemEntry { path, kind, metadata, content })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tar::{Builder, Header};

    fn layer(build: impl FnOnce(&mut Builder<Vec<u8>>)) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        build(&mut builder);
        builder.into_inner().unwrap()
    }

    fn add_file(builder: &mut Builder<Vec<u8>>, path: &str, data: &[u8]) {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, path, data).unwrap();
    }

    fn add_dir(builder: &mut Builder<Vec<u8>>, path: &str) {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        builder.append_data(&mut header, path, std::io::empty()).unwrap();
    }

    #[test]
    fn test_empty_layer_list() {
        let snapshot = apply_layers(Vec::<&[u8]>::new()).unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_layer_stats() {
        let base = layer(|b| {
            add_dir(b, "d/");
            add_file(b, "d/x", b"1");
            add_file(b, "d/y", b"2");
        });
        let top = layer(|b| {
            add_file(b, "d/.wh.x", b"");
            add_file(b, "d/z", b"3");
        });

        let mut engine = OverlayEngine::new();
        let first = engine.apply_layer(0, base.as_slice()).unwrap();
        assert_eq!(first, LayerStats { entries: 3, whiteouts: 0, removed: 0 });

        let second = engine.apply_layer(1, top.as_slice()).unwrap();
        assert_eq!(second, LayerStats { entries: 1, whiteouts: 1, removed: 1 });
        assert_eq!(engine.layers_applied(), 2);

        let snapshot = engine.finish();
        assert!(snapshot.contains("d"));
        assert!(snapshot.contains("d/y"));
        assert!(snapshot.contains("d/z"));
        assert!(!snapshot.contains("d/x"));
    }

    #[test]
    fn test_whiteout_entries_are_not_stored() {
        let data = layer(|b| {
            add_file(b, "a/.wh.gone", b"");
            add_file(b, "a/.wh..wh..opq", b"");
        });
        let snapshot = apply_layers([data.as_slice()]).unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_global_pax_header_is_skipped() {
        let data = layer(|b| {
            let record = b"17 comment=layer\n";
            let mut header = Header::new_ustar();
            header.set_entry_type(EntryType::XGlobalHeader);
            header.set_size(record.len() as u64);
            b.append_data(&mut header, "pax_global_header", &record[..]).unwrap();
            add_file(b, "etc/hosts", b"h");
        });
        let snapshot = apply_layers([data.as_slice()]).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains("etc/hosts"));
    }

    #[test]
    fn test_zero_length_file_has_no_content() {
        let data = layer(|b| add_file(b, "empty", b""));
        let snapshot = apply_layers([data.as_slice()]).unwrap();

        let entry = snapshot.get("empty").unwrap();
        assert_eq!(entry.kind, EntryKind::Regular);
        assert!(entry.content.is_none());
    }

    #[test]
    fn test_hardlink_target_is_normalized() {
        let data = layer(|b| {
            add_file(b, "bin/busybox", b"elf");
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Link);
            header.set_size(0);
            b.append_link(&mut header, "bin/sh", "/bin/busybox").unwrap();
        });
        let snapshot = apply_layers([data.as_slice()]).unwrap();

        let link = snapshot.get("bin/sh").unwrap();
        assert_eq!(link.kind, EntryKind::Hardlink);
        assert_eq!(link.metadata.link_target.as_deref(), Some("bin/busybox"));
    }

    #[test]
    fn test_blank_numeric_fields_read_as_zero() {
        let data = layer(|b| {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_size(2);
            b.append_data(&mut header, "etc/motd", &b"hi"[..]).unwrap();
        });
        let snapshot = apply_layers([data.as_slice()]).unwrap();

        let entry = snapshot.get("etc/motd").unwrap();
        assert_eq!(entry.metadata.mode, 0);
        assert_eq!(entry.metadata.uid, 0);
        assert_eq!(entry.metadata.gid, 0);
        assert_eq!(entry.content.as_deref(), Some(&b"hi"[..]));
    }

    #[test]
    fn test_garbage_numeric_field_is_rejected() {
        let data = layer(|b| {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_size(1);
            header.set_path("f").unwrap();
            header.as_old_mut().uid = *b"zzzzzzz\0";
            header.set_cksum();
            b.append(&header, &b"x"[..]).unwrap();
        });

        let err = apply_layers([data.as_slice()]).unwrap_err();
        assert!(matches!(err, OverlayError::LayerRead { layer_index: 0, .. }));
    }

    #[test]
    fn test_sparse_file_is_regular() {
        let data = layer(|b| {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::GNUSparse);
            header.set_mode(0o600);
            header.set_size(512);
            let gnu = header.as_gnu_mut().unwrap();
            gnu.set_real_size(4096);
            gnu.sparse[0].set_offset(2048);
            gnu.sparse[0].set_length(512);
            gnu.sparse[1].set_offset(4096);
            gnu.sparse[1].set_length(0);
            b.append_data(&mut header, "var/disk.img", &[b'x'; 512][..]).unwrap();
        });
        let snapshot = apply_layers([data.as_slice()]).unwrap();

        let entry = snapshot.get("var/disk.img").unwrap();
        assert_eq!(entry.kind, EntryKind::Regular);
        assert_eq!(entry.metadata.size, 4096);

        let content = entry.content.as_deref().unwrap();
        assert_eq!(content.len(), 4096);
        assert!(content[..2048].iter().all(|b| *b == 0));
        assert!(content[2048..2560].iter().all(|b| *b == b'x'));
        assert!(content[2560..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_parent_component_is_rejected_at_read() {
        let good = layer(|b| add_file(b, "ok", b"fine"));
        // `Builder` refuses `..` names, so write the name into the header directly.
        let bad = layer(|b| {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_size(1);
            header.as_old_mut().name[..6].copy_from_slice(b"a/../b");
            header.set_cksum();
            b.append(&header, &b"x"[..]).unwrap();
        });

        let err = apply_layers([good.as_slice(), bad.as_slice()]).unwrap_err();
        match err {
            OverlayError::LayerRead { layer_index, source } => {
                assert_eq!(layer_index, 1);
                assert!(source.to_string().contains("a/../b"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_error_reports_layer_index() {
        let good = layer(|b| add_file(b, "ok", b"fine"));
        let mut bad = layer(|b| add_file(b, "broken", b"0123456789"));
        bad.truncate(512 + 4);

        let err = apply_layers([good.as_slice(), bad.as_slice()]).unwrap_err();
        assert_eq!(err.layer_index(), 1);
        match err {
            OverlayError::IncompleteFileData { path, expected, actual, .. } => {
                assert_eq!(path, "broken");
                assert_eq!(expected, 10);
                assert_eq!(actual, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
