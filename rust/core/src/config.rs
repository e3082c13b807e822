use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::{Advice, MapFlags, Protection};

/// Declarative description of a mapping
///
/// ```toml
/// protection = "READ | WRITE"
/// lock = false
/// advice = "sequential"
///
/// [flags]
/// portable = "SHARED"
/// linux = "POPULATE"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    /// Page protection, `READ | WRITE` by default
    #[serde(default = "default_protection")]
    pub protection: Protection,

    /// Lock the pages right after mapping
    #[serde(default)]
    pub lock: bool,

    /// Advice applied right after mapping; failures are logged, not fatal
    #[serde(default)]
    pub advice: Option<Advice>,

    /// Mapping flags, `SHARED` by default
    #[serde(default = "default_flags")]
    pub flags: MapFlags,
}

fn default_protection() -> Protection {
    Protection::READ_WRITE
}

fn default_flags() -> MapFlags {
    MapFlags::SHARED
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            protection: default_protection(),
            lock: false,
            advice: None,
            flags: default_flags(),
        }
    }
}

impl MapConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid mapping config")
    }

    /// Load from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read mapping config {:?}", path.as_ref()))?;

        let config: MapConfig = toml::from_str(&content)
            .with_context(|| format!("cannot parse mapping config {:?}", path.as_ref()))?;

        info!("Loaded mapping config from {:?}", path.as_ref());
        Ok(config)
    }
}
