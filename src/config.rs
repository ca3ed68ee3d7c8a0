//! Configuration
//!
//! Loads configuration from TOML file at `~/.config/livewall/config.toml`.
//! Auto-generates a default config file on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub volume: VolumeConfig,
    pub channel: ChannelConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            volume: VolumeConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}

/// Volume-key behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Percent applied per Up/Down key press
    pub step: i64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self { step: 5 }
    }
}

/// Control-socket client tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Connection attempts before giving up on the player's IPC socket
    pub connect_attempts: u32,
    /// Delay between connection attempts, in milliseconds
    pub connect_backoff_ms: u64,
    /// Bound on a single request/reply exchange, in milliseconds
    pub send_timeout_ms: u64,
    /// How often the event loop checks the child's lifecycle, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 50,
            connect_backoff_ms: 100,
            send_timeout_ms: 1000,
            poll_interval_ms: 250,
        }
    }
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content)
            .context("Failed to parse config file")?;

        info!("Configuration loaded from {:?}", config_path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get the path to the config file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("livewall");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let default_config = Self::default();
        let toml_string = toml::to_string_pretty(&default_config)
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string)
            .context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }
}
