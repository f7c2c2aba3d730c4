//! # Reader Configuration
//!
//! Where the snapshot files live and how long a parsed snapshot may be
//! served before it is re-read.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StatusdatError, StatusdatResult};

/// Default lifetime of a parsed snapshot, in seconds.
pub const DEFAULT_CACHE_LIFETIME_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    #[serde(default = "default_objects_file")]
    pub objects_file: PathBuf,
    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,
    /// Re-parse on every refresh.
    #[serde(default)]
    pub no_cache: bool,
    #[serde(default = "default_cache_lifetime")]
    pub cache_lifetime_secs: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            objects_file: default_objects_file(),
            status_file: default_status_file(),
            no_cache: false,
            cache_lifetime_secs: DEFAULT_CACHE_LIFETIME_SECS,
        }
    }
}

fn default_objects_file() -> PathBuf {
    PathBuf::from("/var/cache/icinga/objects.cache")
}
fn default_status_file() -> PathBuf {
    PathBuf::from("/var/cache/icinga/status.dat")
}
fn default_cache_lifetime() -> u64 {
    DEFAULT_CACHE_LIFETIME_SECS
}

impl ReaderConfig {
    pub fn new(objects_file: impl Into<PathBuf>, status_file: impl Into<PathBuf>) -> Self {
        Self {
            objects_file: objects_file.into(),
            status_file: status_file.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(content: &str) -> StatusdatResult<Self> {
        toml::from_str(content).map_err(|e| StatusdatError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> StatusdatResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| StatusdatError::File {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}
