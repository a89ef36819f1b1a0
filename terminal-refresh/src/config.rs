//! Configuration for terminal refreshes.

use serde::{Deserialize, Serialize};
use std::path::Path;

use terminal_capability::SuccessRatePolicy;

/// Configuration for a [`crate::Refresher`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Success-rate demotion policy
    pub success_rate: SuccessRatePolicy,
    /// Batch refresh configuration
    pub batch: BatchConfig,
    /// Write consistency configuration
    pub consistency: ConsistencyConfig,
}

impl RefreshConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Load config from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml(&content)?)
    }
}

/// Batch refresh configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum terminals refreshed concurrently
    pub max_concurrent: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_concurrent: 8 }
    }
}

/// Write consistency configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyConfig {
    /// Reject the write if the terminal changed since it was read
    pub optimistic: bool,
}
