use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SatchelError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SatchelConfig {
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Override for the local cache base directory. When unset, the platform
    /// cache dir is used (see [`crate::platform::cache_base_dir`]).
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkerConfig {
    #[serde(default = "default_min_size")]
    pub min_size: u32,
    #[serde(default = "default_avg_size")]
    pub avg_size: u32,
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    /// Chunking normalization level (0-3). Higher levels bias the boundary
    /// probability to tighten the chunk size distribution around `avg_size`.
    #[serde(default = "default_normalization")]
    pub normalization: u32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: default_min_size(),
            avg_size: default_avg_size(),
            max_size: default_max_size(),
            normalization: default_normalization(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            zstd_level: default_zstd_level(),
        }
    }
}

/// Retry policy for the final snapshot save, the one write whose loss cannot
/// be recovered by re-running ingestion. Backoff grows linearly:
/// `delay_ms`, `2 * delay_ms`, ...
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

fn default_min_size() -> u32 {
    512 * 1024 // 512 KiB
}

fn default_avg_size() -> u32 {
    2 * 1024 * 1024 // 2 MiB
}

fn default_max_size() -> u32 {
    8 * 1024 * 1024 // 8 MiB
}

fn default_normalization() -> u32 {
    1
}

fn default_algorithm() -> String {
    "zstd".to_string()
}

fn default_zstd_level() -> i32 {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    1000
}

/// Load and parse a config file.
pub fn load_config(path: &Path) -> Result<SatchelConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| SatchelError::Config(format!("cannot read '{}': {e}", path.display())))?;
    let config: SatchelConfig = serde_yaml::from_str(&contents)
        .map_err(|e| SatchelError::Config(format!("invalid config '{}': {e}", path.display())))?;
    Ok(config)
}

/// Returns a minimal YAML config template suitable for bootstrapping.
pub fn minimal_config_template() -> &'static str {
    r#"# satchel configuration file

chunker:
  min_size: 524288
  avg_size: 2097152
  max_size: 8388608
  normalization: 1

compression:
  algorithm: zstd
  zstd_level: 3

retry:
  max_attempts: 3
  delay_ms: 1000
"#
}
