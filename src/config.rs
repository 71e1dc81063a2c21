//! YAML station configuration.
//!
//! The configuration describes the station the export comes from and the
//! sensors it is expected to carry. It is informational: nothing here is used
//! to validate the header or the records of an export.

use serde::Deserialize;
use serde_yaml::Value as YamlValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Station configuration as written in the YAML file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StationConfig {
    /// Human-readable station name.
    pub station_name: String,
    /// Sensors wired to the logger, in channel order.
    pub sensors: Vec<SensorConfig>,
}

/// A sensor descriptor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorConfig {
    pub name: String,
    #[serde(default)]
    pub calibration: Option<YamlValue>,
    #[serde(default)]
    pub channel: Option<YamlValue>,
    /// Any other keys, kept as-is.
    #[serde(flatten)]
    pub extra: BTreeMap<String, YamlValue>,
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid station config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl StationConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }
}

/// The station a run is relaying for. Built once at startup and never changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    name: String,
    sensors: Vec<SensorConfig>,
}

impl Station {
    pub fn from_config(config: StationConfig) -> Self {
        Self {
            name: config.station_name,
            sensors: config.sensors,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sensors(&self) -> &[SensorConfig] {
        &self.sensors
    }

    pub fn sensor(&self, name: &str) -> Option<&SensorConfig> {
        self.sensors.iter().find(|s| s.name == name)
    }
}
