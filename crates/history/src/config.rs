//! Project configuration stored at `.chunkline/config.toml`

use anyhow::{Context, Result};
use chunkline_core::{FingerprintConfig, ScanConfig, StoreConfig};
use chunkline_lineage::LineageConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "config.toml";

/// Every section falls back to its defaults when absent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub store: StoreConfig,
    pub scan: ScanConfig,
    pub fingerprint: FingerprintConfig,
    pub lineage: LineageConfig,
}

impl ProjectConfig {
    /// Load from a `.chunkline` directory; a missing file yields defaults
    pub fn load(store_dir: &Path) -> Result<Self> {
        let path = store_dir.join(CONFIG_FILE);
        if !path.exists() {
            tracing::debug!("Project config not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read project config at {}", path.display()))?;
        let config: ProjectConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse project config at {}", path.display()))?;

        tracing::debug!("Loaded project config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, store_dir: &Path) -> Result<()> {
        let path = store_dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self).context("Failed to serialize project config")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write project config to {}", path.display()))?;
        Ok(())
    }

    /// Write the default config unless one already exists
    pub fn write_default(store_dir: &Path) -> Result<Self> {
        let config = Self::default();
        if !store_dir.join(CONFIG_FILE).exists() {
            config.save(store_dir)?;
        }
        Ok(config)
    }
}
