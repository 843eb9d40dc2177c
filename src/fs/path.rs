//! Path helpers for archive entry names.
//!
//! Every path stored in a [`Snapshot`](super::Snapshot) is relative, has no
//! empty or `.` components and carries no trailing separator. The root of the
//! filesystem is spelled [`ROOT_PATH`].

/// Normalized spelling of the filesystem root.
pub const ROOT_PATH: &str = ".";

/// Normalize a raw archive entry name into a snapshot key.
///
/// Leading separators and `./` prefixes are stripped, repeated separators are
/// collapsed and a trailing separator is dropped. An empty result maps to
/// [`ROOT_PATH`]. `..` components are kept verbatim; callers reject them with
/// [`has_parent_component`].
pub fn normalize_entry_path(raw: &str) -> String {
    let parts: Vec<&str> = raw.split('/').filter(|s| !s.is_empty() && *s != ".").collect();

    if parts.is_empty() {
        return ROOT_PATH.to_string();
    }

    parts.join("/")
}

/// Returns true if any component of `path` is `..`.
pub fn has_parent_component(path: &str) -> bool {
    path.split('/').any(|c| c == "..")
}

/// Split a normalized path into its parent directory and final component.
///
/// Top-level names have [`ROOT_PATH`] as their parent. The root itself has no
/// final component and is returned as `(".", "")`.
pub fn split_path(path: &str) -> (&str, &str) {
    if path == ROOT_PATH {
        return (ROOT_PATH, "");
    }

    match path.rfind('/') {
        Some(pos) => (&path[..pos], &path[pos + 1..]),
        None => (ROOT_PATH, path),
    }
}

/// Join a normalized parent directory and a single component.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent == ROOT_PATH { name.to_string() } else { format!("{}/{}", parent, name) }
}

/// Returns true if `path` lies strictly inside the directory `dir`.
///
/// The comparison is component-wise: `ab/c` is not inside `a`.
pub fn is_within(path: &str, dir: &str) -> bool {
    if dir == ROOT_PATH {
        return path != ROOT_PATH;
    }

    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

/// Number of components in a normalized path; the root has depth zero.
pub fn depth(path: &str) -> usize {
    if path == ROOT_PATH { 0 } else { path.split('/').count() }
}
