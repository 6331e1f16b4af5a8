//! Service configuration, loaded from TOML.
//!
//! Every key is optional; a missing key takes its default. Unknown keys
//! are rejected so typos surface instead of silently falling back.
//!
//! ```toml
//! data_dir = "data"
//! date_formats = ["%Y-%m-%d", "%Y%m%d"]
//! coverage_mode = "segments"   # or "hull"
//! default_adjust = "qfq"       # "hfq" or "none"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stockcache_core::{Adjust, CoverageMode, DateFormats};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Root directory of the per-stock store.
    pub data_dir: PathBuf,

    /// Formats accepted for date parameters and provider date columns,
    /// tried in order.
    pub date_formats: DateFormats,

    pub coverage_mode: CoverageMode,

    /// Adjustment used when a history request does not name one.
    pub default_adjust: Adjust,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            date_formats: DateFormats::default(),
            coverage_mode: CoverageMode::default(),
            default_adjust: Adjust::default(),
        }
    }
}

impl ServiceConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load config file {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir must not be empty".into()));
        }
        if self.date_formats.formats().is_empty() {
            return Err(ConfigError::Invalid(
                "date_formats must list at least one format".into(),
            ));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
