use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use imgflat::archive::ordered_entries;
use imgflat::config::{Config, LoggingConfig};
use imgflat::export::{ExportPipeline, LayerFile, LayerSource};
use imgflat::layer::OverlayEngine;

/// Flatten container image layers into a single tar archive.
#[derive(Parser)]
#[command(name = "imgflat", version, about)]
struct Cli {
    /// Configuration file (defaults to ./imgflat.* when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the flattened filesystem as a tar archive
    Export {
        /// Layer archives, oldest first (plain or gzip compressed tar)
        #[arg(required = true)]
        layers: Vec<PathBuf>,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Treat layer files as plain tar even if they look compressed
        #[arg(long)]
        no_decompress: bool,
    },

    /// Print the flattened entries in archive order
    List {
        /// Layer archives, oldest first (plain or gzip compressed tar)
        #[arg(required = true)]
        layers: Vec<PathBuf>,

        /// Emit one JSON array instead of text lines
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct ListingRow<'a> {
    path: &'a str,
    kind: &'a str,
    mode: String,
    uid: u64,
    gid: u64,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    link_target: Option<&'a str>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };

    init_tracing(&config.logging);

    match cli.command {
        Command::Export { layers, output, no_decompress } => {
            let output = output.or(config.export.output.clone());
            let decompress = config.export.decompress_layers && !no_decompress;
            run_export(&layers, output.as_deref(), decompress)
        }
        Command::List { layers, json } => {
            run_list(&layers, config.export.decompress_layers, json)
        }
    }
}

/// Logs go to stderr so stdout can carry the archive.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| logging.filter.as_str().into());
    let registry = tracing_subscriber::registry().with(filter);

    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr)).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_writer(io::stderr)).init();
    }
}

fn layer_files(paths: &[PathBuf], decompress: bool) -> Vec<LayerFile> {
    paths.iter().map(|p| LayerFile::new(p).decompress(decompress)).collect()
}

fn run_export(layers: &[PathBuf], output: Option<&Path>, decompress: bool) -> Result<()> {
    let sources = layer_files(layers, decompress);
    let mut pipeline = ExportPipeline::new();

    let report = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create output file {}", path.display()))?;

            let result = pipeline.run(sources, BufWriter::new(file)).map_err(anyhow::Error::from);
            let result = result.and_then(|(mut writer, report)| {
                writer.flush().context("failed to flush output file")?;
                Ok(report)
            });

            if result.is_err() {
                // The partial archive is unusable; do not leave it behind.
                if let Err(err) = std::fs::remove_file(path) {
                    tracing::warn!(path = %path.display(), error = %err, "Failed to remove partial output");
                }
            }
            let report = result.context("failed to export filesystem")?;

            eprintln!("Filesystem exported to {}", path.display());
            report
        }
        None => {
            let stdout = io::stdout().lock();
            let (mut writer, report) = pipeline
                .run(sources, BufWriter::new(stdout))
                .context("failed to export filesystem")?;
            writer.flush().context("failed to flush stdout")?;
            report
        }
    };

    eprintln!(
        "{} layers, {} entries, {} bytes, sha256:{}",
        report.layers_applied, report.entries_written, report.bytes_written, report.digest
    );

    Ok(())
}

fn run_list(layers: &[PathBuf], decompress: bool, json: bool) -> Result<()> {
    let mut engine = OverlayEngine::new();
    for (index, source) in layer_files(layers, decompress).into_iter().enumerate() {
        let name = source.describe();
        let reader = source.open().with_context(|| format!("failed to open layer {}", name))?;
        engine.apply_layer(index, reader).with_context(|| format!("failed to apply layer {}", name))?;
    }

    let snapshot = engine.finish();
    let rows: Vec<ListingRow<'_>> = ordered_entries(&snapshot)
        .into_iter()
        .map(|entry| ListingRow {
            path: &entry.path,
            kind: entry.kind.as_str(),
            mode: format!("{:04o}", entry.metadata.mode & 0o7777),
            uid: entry.metadata.uid,
            gid: entry.metadata.gid,
            size: entry.content_len(),
            link_target: entry.metadata.link_target.as_deref(),
        })
        .collect();

    let mut out = io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut out, &rows)?;
        writeln!(out)?;
    } else {
        for row in &rows {
            match row.link_target {
                Some(target) => writeln!(
                    out,
                    "{:<8} {} {:>10} {} -> {}",
                    row.kind, row.mode, row.size, row.path, target
                )?,
                None => writeln!(out, "{:<8} {} {:>10} {}", row.kind, row.mode, row.size, row.path)?,
            }
        }
    }

    Ok(())
}
