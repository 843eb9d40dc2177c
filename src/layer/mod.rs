//! Layer overlay module.
//!
//! This module turns an ordered list of layer diffs into one flattened
//! filesystem snapshot:
//! - Whiteout marker recognition (`.wh.<name>`, `.wh..wh..opq`)
//! - Sequential layer application with later-wins semantics

mod overlay;
mod whiteout;

pub use overlay::{LayerStats, OverlayEngine, OverlayError, OverlayResult, apply_layers};
pub use whiteout::{OPAQUE_WHITEOUT, WHITEOUT_PREFIX, Whiteout, classify};
