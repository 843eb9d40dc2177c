//! Filesystem data model shared by the overlay engine and the serializer.

pub mod entry;
pub mod path;
pub mod snapshot;

pub use entry::{EntryKind, EntryMetadata, FilesystemEntry};
pub use path::{ROOT_PATH, has_parent_component, normalize_entry_path};
pub use snapshot::Snapshot;
