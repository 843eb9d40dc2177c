//! Export pipeline.
//!
//! Runs one export request through `Idle → Applying(i) → Sorting → Writing →
//! Done`. Any failure moves the pipeline to `Failed`; both end states are
//! terminal and a pipeline is never re-run.

use std::fmt;
use std::io::{Read, Write};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::source::{LayerSource, StreamLayer};
use crate::archive::{ArchiveError, ArchiveSerializer, HashingWriter, ordered_entries};
use crate::layer::{OverlayEngine, OverlayError};

/// Errors that can abort an export.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("failed to open layer {layer_index} ({source_name}): {source}")]
    LayerOpen {
        layer_index: usize,
        source_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Overlay(#[from] OverlayError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("export pipeline cannot run from stage {0}")]
    NotIdle(ExportStage),
}

/// Result type for export operations.
pub type ExportResult<T> = Result<T, ExportError>;

/// Stage of an export pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Idle,
    Applying { layer: usize },
    Sorting,
    Writing,
    Done,
    Failed,
}

impl ExportStage {
    /// Returns true for `Done` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportStage::Done | ExportStage::Failed)
    }
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportStage::Idle => write!(f, "idle"),
            ExportStage::Applying { layer } => write!(f, "applying layer {}", layer),
            ExportStage::Sorting => write!(f, "sorting"),
            ExportStage::Writing => write!(f, "writing"),
            ExportStage::Done => write!(f, "done"),
            ExportStage::Failed => write!(f, "failed"),
        }
    }
}

/// Summary of a finished export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub layers_applied: usize,
    pub entries_written: usize,
    /// Total regular-file content held in memory for the export.
    pub content_bytes: u64,
    /// Size of the produced archive.
    pub bytes_written: u64,
    /// Hex SHA-256 digest of the produced archive.
    pub digest: String,
}

/// Drives layer application and archive serialization for one export.
#[derive(Debug)]
pub struct ExportPipeline {
    stage: ExportStage,
}

impl Default for ExportPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportPipeline {
    pub fn new() -> Self {
        Self { stage: ExportStage::Idle }
    }

    pub fn stage(&self) -> ExportStage {
        self.stage
    }

    fn transition(&mut self, next: ExportStage) {
        debug!(from = %self.stage, to = %next, "Export stage transition");
        self.stage = next;
    }

    /// Flatten `layers` (oldest first) and write the archive into `sink`.
    ///
    /// Returns the sink together with a report. On error whatever already
    /// reached the sink is an incomplete artifact.
    pub fn run<I, S, W>(&mut self, layers: I, sink: W) -> ExportResult<(W, ExportReport)>
    where
        I: IntoIterator<Item = S>,
        S: LayerSource,
        W: Write,
    {
        if self.stage != ExportStage::Idle {
            return Err(ExportError::NotIdle(self.stage));
        }

        let result = self.execute(layers, sink);
        if let Err(err) = &result {
            warn!(stage = %self.stage, error = %err, "Export failed");
            self.transition(ExportStage::Failed);
        }
        result
    }

    fn execute<I, S, W>(&mut self, layers: I, sink: W) -> ExportResult<(W, ExportReport)>
    where
        I: IntoIterator<Item = S>,
        S: LayerSource,
        W: Write,
    {
        let mut engine = OverlayEngine::new();

        for (layer_index, source) in layers.into_iter().enumerate() {
            self.transition(ExportStage::Applying { layer: layer_index });

            let source_name = source.describe();
            let reader = source.open().map_err(|source| ExportError::LayerOpen {
                layer_index,
                source_name: source_name.clone(),
                source,
            })?;

            let stats = engine.apply_layer(layer_index, reader)?;
            info!(
                layer_index,
                source = %source_name,
                entries = stats.entries,
                whiteouts = stats.whiteouts,
                "Layer applied"
            );
        }

        let layers_applied = engine.layers_applied();
        let snapshot = engine.finish();

        self.transition(ExportStage::Sorting);
        let entries = ordered_entries(&snapshot);

        self.transition(ExportStage::Writing);
        let mut serializer = ArchiveSerializer::new(HashingWriter::new(sink));
        for entry in &entries {
            serializer.write_entry(entry)?;
        }
        let entries_written = serializer.entries_written();
        let (sink, digest, bytes_written) = serializer.finish()?.into_parts();

        self.transition(ExportStage::Done);

        let report = ExportReport {
            layers_applied,
            entries_written,
            content_bytes: snapshot.content_bytes(),
            bytes_written,
            digest,
        };
        info!(
            layers = report.layers_applied,
            entries = report.entries_written,
            bytes = report.bytes_written,
            digest = %report.digest,
            "Export complete"
        );

        Ok((sink, report))
    }
}

/// Flatten already-open layer streams into `sink`.
pub fn export_layers<I, R, W>(layers: I, sink: W) -> ExportResult<(W, ExportReport)>
where
    I: IntoIterator<Item = R>,
    R: Read,
    W: Write,
{
    ExportPipeline::new().run(layers.into_iter().map(StreamLayer::new), sink)
}
