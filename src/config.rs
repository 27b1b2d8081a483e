//! Configuration module for evaluation runs.
//!
//! Handles YAML configuration loading with defaults for every field, so an
//! empty document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Complete evaluation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvalConfig {
    /// Spectral learner settings
    #[serde(default)]
    pub spectral: SpectralSettings,
    /// Optional EM baseline settings
    #[serde(default)]
    pub em: EmSettings,
    /// Report output settings
    #[serde(default)]
    pub report: ReportSettings,
    /// Statistical comparison settings
    #[serde(default)]
    pub stats: StatSettings,
}

/// Spectral learner settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpectralSettings {
    /// Rank `m` of the learned observable operators
    #[serde(default = "default_rank")]
    pub rank: usize,
}

const fn default_rank() -> usize {
    4
}

impl Default for SpectralSettings {
    fn default() -> Self {
        Self {
            rank: default_rank(),
        }
    }
}

/// Baum-Welch baseline settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmSettings {
    /// Train and report the EM baseline
    #[serde(default)]
    pub enabled: bool,
    /// Number of hidden states
    #[serde(default = "default_states")]
    pub states: usize,
    /// Iteration cap
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Stop when the log-likelihood changes by less than this
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Seed for the random initial parameters
    #[serde(default = "default_seed")]
    pub seed: u64,
}

const fn default_states() -> usize {
    4
}
const fn default_max_iterations() -> usize {
    100
}
const fn default_tolerance() -> f64 {
    1e-4
}
const fn default_seed() -> u64 {
    42
}

impl Default for EmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            states: default_states(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            seed: default_seed(),
        }
    }
}

/// Report output settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportSettings {
    /// Path of the tab-separated text report
    #[serde(default = "default_report_path")]
    pub path: PathBuf,
    /// Optional path for a JSON rendering of the evaluation
    #[serde(default)]
    pub json: Option<PathBuf>,
}

fn default_report_path() -> PathBuf {
    PathBuf::from("HMM_SL.log")
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            path: default_report_path(),
            json: None,
        }
    }
}

/// Statistical comparison settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatSettings {
    /// Significance threshold for the estimator comparison
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

const fn default_alpha() -> f64 {
    0.05
}

impl Default for StatSettings {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
        }
    }
}

impl EvalConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or holds
    /// out-of-range values.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed or holds out-of-range
    /// values.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.spectral.rank == 0 {
            return Err(ConfigError::InvalidValue(
                "spectral.rank must be at least 1".to_string(),
            ));
        }
        if self.em.states == 0 {
            return Err(ConfigError::InvalidValue(
                "em.states must be at least 1".to_string(),
            ));
        }
        if !(self.em.tolerance.is_finite() && self.em.tolerance >= 0.0) {
            return Err(ConfigError::InvalidValue(format!(
                "em.tolerance must be a non-negative number, got {}",
                self.em.tolerance
            )));
        }
        if !(self.stats.alpha > 0.0 && self.stats.alpha < 1.0) {
            return Err(ConfigError::InvalidValue(format!(
                "stats.alpha must be in (0, 1), got {}",
                self.stats.alpha
            )));
        }
        Ok(())
    }
}
