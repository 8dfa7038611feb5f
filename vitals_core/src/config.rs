//! Configuration file support for vitals.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/vitals/config.toml`.

use crate::aggregate::SamplingPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MIB: u64 = 1024 * 1024;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub sampling: SamplingConfig,

    #[serde(default)]
    pub summary: SummaryConfig,
}

/// Output location configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// What to do with a member larger than `large_member_bytes`
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LargeMemberStrategy {
    /// Stream the whole member through bounded windows
    #[default]
    Stream,
    /// Only process a prefix and mark the result as truncated
    Sample,
}

/// Streaming ingestion parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Bytes read per window
    #[serde(default = "default_window_bytes")]
    pub window_bytes: usize,

    #[serde(default = "default_large_member_bytes")]
    pub large_member_bytes: u64,

    /// Prefix processed under the `sample` strategy
    #[serde(default = "default_sample_prefix_bytes")]
    pub sample_prefix_bytes: u64,

    #[serde(default)]
    pub large_member_strategy: LargeMemberStrategy,

    /// Windows without a safe cut point before reporting recovery
    #[serde(default = "default_recovery_windows")]
    pub recovery_windows: u32,

    /// Bytes an unclosed workout block may span before it is dropped
    #[serde(default = "default_max_block_bytes")]
    pub max_block_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            window_bytes: default_window_bytes(),
            large_member_bytes: default_large_member_bytes(),
            sample_prefix_bytes: default_sample_prefix_bytes(),
            large_member_strategy: LargeMemberStrategy::default(),
            recovery_windows: default_recovery_windows(),
            max_block_bytes: default_max_block_bytes(),
        }
    }
}

/// Sampled-series policies per observation kind
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_record_sampling")]
    pub records: SamplingPolicy,

    #[serde(default = "default_statistic_sampling")]
    pub workout_statistics: SamplingPolicy,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            records: default_record_sampling(),
            workout_statistics: default_statistic_sampling(),
        }
    }
}

/// Summary builder configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(std::env::temp_dir);
    base.join("vitals")
}

fn default_window_bytes() -> usize {
    3 * MIB as usize
}

fn default_large_member_bytes() -> u64 {
    10 * MIB
}

fn default_sample_prefix_bytes() -> u64 {
    5 * MIB
}

fn default_recovery_windows() -> u32 {
    4
}

fn default_max_block_bytes() -> u64 {
    16 * MIB
}

fn default_record_sampling() -> SamplingPolicy {
    SamplingPolicy::RECORDS
}

fn default_statistic_sampling() -> SamplingPolicy {
    SamplingPolicy::WORKOUT_STATISTICS
}

fn default_top_n() -> usize {
    10
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::debug!(
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
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(std::env::temp_dir);
        base.join("vitals").join("config.toml")
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, self.to_toml()?)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Render as a TOML document
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Reject values the ingestion pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.ingest.window_bytes == 0 {
            return Err(Error::Config("ingest.window_bytes must be positive".into()));
        }
        if self.ingest.max_block_bytes == 0 {
            return Err(Error::Config(
                "ingest.max_block_bytes must be positive".into(),
            ));
        }
        if self.ingest.sample_prefix_bytes > self.ingest.large_member_bytes {
            return Err(Error::Config(format!(
                "ingest.sample_prefix_bytes ({}) exceeds ingest.large_member_bytes ({})",
                self.ingest.sample_prefix_bytes, self.ingest.large_member_bytes
            )));
        }
        for (name, policy) in [
            ("records", &self.sampling.records),
            ("workout_statistics", &self.sampling.workout_statistics),
        ] {
            if policy.stride == 0 {
                return Err(Error::Config(format!(
                    "sampling.{}.stride must be positive",
                    name
                )));
            }
        }
        Ok(())
    }
}
