//! Whiteout marker recognition.
//!
//! Layer diffs express deletions with specially named entries: `.wh.<name>`
//! removes `<name>` from the lower layers, and `.wh..wh..opq` hides the lower
//! contents of the directory it sits in.

use crate::fs::path::{join_path, split_path};

/// File-name prefix marking a deleted path.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// File name marking a directory whose lower contents are hidden.
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// A deletion requested by a layer entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Whiteout {
    /// Clear everything strictly inside `dir`.
    Opaque { dir: String },
    /// Remove `target` and everything beneath it.
    Remove { target: String },
}

impl Whiteout {
    /// Path the marker applies to.
    pub fn path(&self) -> &str {
        match self {
            Whiteout::Opaque { dir } => dir,
            Whiteout::Remove { target } => target,
        }
    }
}

/// Classify a normalized entry path.
///
/// Returns `None` for ordinary entries. A bare `.wh.` name with nothing after
/// the prefix names no target and is treated as an ordinary entry.
pub fn classify(path: &str) -> Option<Whiteout> {
    let (parent, name) = split_path(path);

    if name == OPAQUE_WHITEOUT {
        return Some(Whiteout::Opaque { dir: parent.to_string() });
    }

    match name.strip_prefix(WHITEOUT_PREFIX) {
        Some(rest) if !rest.is_empty() => Some(Whiteout::Remove { target: join_path(parent, rest) }),
        _ => None,
    }
}
