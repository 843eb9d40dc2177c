//! Export module.
//!
//! Wires the overlay engine and the archive serializer into a single export
//! call and provides the layer sources it reads from.

mod pipeline;
mod source;

pub use pipeline::{
    ExportError, ExportPipeline, ExportReport, ExportResult, ExportStage, export_layers,
};
pub use source::{LayerFile, LayerSource, StreamLayer};
