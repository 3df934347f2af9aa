use crate::{detectors::ecg::DetectorConfig, error::ConfigError, filter::BandpassConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Tunables for the whole per-record pipeline. Every field has a default, so
/// a config file only needs the values it changes:
///
/// ```toml
/// [filter]
/// low_hz = 0.5
/// high_hz = 40.0
///
/// [detector]
/// min_spacing_s = 0.3
/// threshold = { strategy = "windowed", window_s = 5.0, k = 0.5 }
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub filter: BandpassConfig,
    pub detector: DetectorConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
