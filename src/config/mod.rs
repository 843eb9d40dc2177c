use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Archive destination; stdout when unset.
    pub output: Option<PathBuf>,
    /// Detect and decompress gzip layer files.
    pub decompress_layers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives, overridden by `RUST_LOG`.
    pub filter: String,
    pub json: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { output: None, decompress_layers: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "imgflat=info,warn".to_string(), json: false }
    }
}

impl Config {
    /// Load from an optional `imgflat.*` file in the working directory and
    /// `IMGFLAT_`-prefixed environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("imgflat").required(false))
            .add_source(environment())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load from an explicit file, still honoring environment overrides.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(environment())
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("IMGFLAT")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
