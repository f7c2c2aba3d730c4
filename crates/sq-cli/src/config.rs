//! `sq.toml`: reader locations and output defaults.

use std::path::Path;

use serde::Deserialize;
use sq_statusdat::{ReaderConfig, StatusdatError, StatusdatResult};

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub statusdat: ReaderConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OutputConfig {
    /// Page size when `--limit` is not given; 0 prints everything.
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
        }
    }
}

fn default_limit() -> usize {
    50
}

impl Config {
    /// Load `path`. A missing file yields the defaults; a malformed one is
    /// an error.
    pub fn load(path: &Path) -> StatusdatResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| StatusdatError::File {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|e| match e {
            StatusdatError::Config(message) => {
                StatusdatError::Config(format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }

    pub fn parse(content: &str) -> StatusdatResult<Self> {
        toml::from_str(content).map_err(|e| StatusdatError::Config(e.to_string()))
    }
}
