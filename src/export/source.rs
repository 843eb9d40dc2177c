//! Layer sources.
//!
//! A layer source is opened lazily by the pipeline right before the layer is
//! applied, so at most one layer stream is open at a time.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;

/// Magic bytes at the start of a gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Something that can be opened into an uncompressed layer stream.
pub trait LayerSource {
    type Reader: Read;

    /// Open the layer for reading.
    fn open(self) -> io::Result<Self::Reader>;

    /// Human readable name used in errors and logs.
    fn describe(&self) -> String;
}

/// A layer already available as a stream.
#[derive(Debug)]
pub struct StreamLayer<R> {
    reader: R,
    name: String,
}

impl<R: Read> StreamLayer<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, name: "<stream>".to_string() }
    }

    pub fn named(reader: R, name: impl Into<String>) -> Self {
        Self { reader, name: name.into() }
    }
}

impl<R: Read> LayerSource for StreamLayer<R> {
    type Reader = R;

    fn open(self) -> io::Result<R> {
        Ok(self.reader)
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// A layer archive on the local filesystem, optionally gzip compressed.
#[derive(Debug, Clone)]
pub struct LayerFile {
    path: PathBuf,
    decompress: bool,
}

impl LayerFile {
    /// Layer file with gzip auto-detection enabled.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), decompress: true }
    }

    /// Enable or disable gzip auto-detection.
    pub fn decompress(mut self, decompress: bool) -> Self {
        self.decompress = decompress;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LayerSource for LayerFile {
    type Reader = Box<dyn Read>;

    fn open(self) -> io::Result<Box<dyn Read>> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        if self.decompress && is_gzip(&mut reader)? {
            debug!(path = %self.path.display(), "Decompressing gzip layer");
            return Ok(Box::new(GzDecoder::new(reader)));
        }

        Ok(Box::new(reader))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Peek at the buffered stream without consuming it.
fn is_gzip<R: BufRead>(reader: &mut R) -> io::Result<bool> {
    let buf = reader.fill_buf()?;
    Ok(buf.len() >= GZIP_MAGIC.len() && buf[..GZIP_MAGIC.len()] == GZIP_MAGIC)
}
