//! Archive serialization module.
//!
//! Turns a flattened [`Snapshot`](crate::fs::Snapshot) into a single tar
//! stream that a sequential extractor can unpack without ever meeting an
//! entry whose parent directory has not been created yet.

mod digest;
mod ordering;
mod writer;

pub use digest::HashingWriter;
pub use ordering::{compare_entries, kind_priority, ordered_entries};
pub use writer::{
    ArchiveError, ArchiveResult, ArchiveSerializer, NORMALIZED_MTIME, WritePhase, write_snapshot,
};
