//! Flatten layered container image filesystems into a single tar archive.
//!
//! Layer diffs are applied oldest first by the [`layer::OverlayEngine`],
//! honoring whiteout markers, and the resulting [`fs::Snapshot`] is written
//! by the [`archive::ArchiveSerializer`] in an order that extracts linearly.

pub mod archive;
pub mod config;
pub mod export;
pub mod fs;
pub mod layer;

pub use archive::{ArchiveError, ArchiveSerializer, write_snapshot};
pub use export::{ExportError, ExportPipeline, ExportReport, ExportStage, export_layers};
pub use fs::{EntryKind, FilesystemEntry, Snapshot};
pub use layer::{OverlayEngine, OverlayError, apply_layers};
