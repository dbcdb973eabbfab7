//! Configuration file support for the TDM engine.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/tdm/config.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub evaluator: EvaluatorConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

/// Evaluator endpoint and retry configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EvaluatorConfig {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts when the evaluator reports it is busy
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Candidate search configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    /// Number of regimens returned
    #[serde(default = "default_keep")]
    pub keep: usize,

    /// Replaces the drug-specific dose step when set
    #[serde(default)]
    pub step_override: Option<f64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            keep: default_keep(),
            step_override: None,
        }
    }
}

// Default value functions
fn default_url() -> String {
    "http://127.0.0.1:8000/forecast".into()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    4000
}

fn default_keep() -> usize {
    3
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let base = match dirs::config_dir() {
            Some(dir) => dir,
            None => {
                let home = std::env::var("HOME").map_err(|_| {
                    Error::Config("HOME environment variable not set".into())
                })?;
                PathBuf::from(home).join(".config")
            }
        };
        Ok(base.join("tdm").join("config.toml"))
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let evaluator = &self.evaluator;
        if evaluator.url.trim().is_empty() {
            return Err(Error::Config("evaluator.url must not be empty".into()));
        }
        if evaluator.timeout_secs == 0 {
            return Err(Error::Config("evaluator.timeout_secs must be positive".into()));
        }
        if evaluator.max_attempts == 0 {
            return Err(Error::Config("evaluator.max_attempts must be at least 1".into()));
        }
        if evaluator.base_delay_ms > evaluator.max_delay_ms {
            return Err(Error::Config(format!(
                "evaluator.base_delay_ms ({}) exceeds max_delay_ms ({})",
                evaluator.base_delay_ms, evaluator.max_delay_ms
            )));
        }
        if self.search.keep == 0 {
            return Err(Error::Config("search.keep must be at least 1".into()));
        }
        if let Some(step) = self.search.step_override {
            if !(step > 0.0) {
                return Err(Error::Config("search.step_override must be positive".into()));
            }
        }
        Ok(())
    }
}
