use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::sink::RetryPolicy;

const SECTOR_SIZE: usize = 512;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub run_id: String,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default)]
    pub verbose: u8,
    #[serde(default)]
    pub paranoid: bool,
    #[serde(default)]
    pub keep_bad: bool,
    /// Format id -> enabled. Formats missing here use `enable_by_default`.
    #[serde(default)]
    pub formats: BTreeMap<String, bool>,
    #[serde(default)]
    pub retry_delays_ms: Option<Vec<u64>>,
}

fn default_block_size() -> usize {
    SECTOR_SIZE
}

fn default_window_size() -> usize {
    64 * 1024
}

fn default_chunk_size() -> u64 {
    8 * 1024 * 1024
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size % SECTOR_SIZE != 0 {
            bail!(
                "block_size must be a non-zero multiple of {SECTOR_SIZE}, got {}",
                self.block_size
            );
        }
        if self.window_size < self.block_size {
            bail!(
                "window_size ({}) must be at least block_size ({})",
                self.window_size,
                self.block_size
            );
        }
        if self.chunk_size < self.block_size as u64 {
            bail!(
                "chunk_size ({}) must be at least block_size ({})",
                self.chunk_size,
                self.block_size
            );
        }
        Ok(())
    }

    /// Whether a format is enabled, falling back to its built-in default.
    pub fn format_enabled(&self, id: &str, enable_by_default: bool) -> bool {
        self.formats.get(id).copied().unwrap_or(enable_by_default)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match &self.retry_delays_ms {
            Some(delays) => RetryPolicy::new(delays.iter().map(|ms| Duration::from_millis(*ms))),
            None => RetryPolicy::platform_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p)?
    } else {
        include_bytes!("../config/default.yml").to_vec()
    };

    let mut config: Config = serde_yaml::from_slice(&bytes)?;
    if config.run_id.trim().is_empty() {
        config.run_id = generate_run_id();
    }
    config.validate()?;

    let config_hash = hash_bytes(&bytes);

    Ok(LoadedConfig { config, config_hash })
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn generate_run_id() -> String {
    let now = chrono::Utc::now();
    format!("{}_{:08x}", now.format("%Y%m%dT%H%M%SZ"), now.timestamp_subsec_nanos())
}
