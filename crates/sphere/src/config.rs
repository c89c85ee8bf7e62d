//! Configuration management for sphere.
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. Environment variables (SPHERE_*)
//! 2. Config file (`<config dir>/sphere/config.toml`, or `SPHERE_CONFIG`)
//! 3. Default values

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sphere_core::config::{ClientConfig, DEFAULT_TIMEOUT_SECS};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// SocialSphere API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Live channel settings
    #[serde(default)]
    pub channel: ChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// REST base address, including the `/api/v1` suffix
    #[serde(default = "default_api_url")]
    pub url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Open the live channel in the shell
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions
fn default_api_url() -> String {
    "http://localhost:5000/api/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Some(path) => Self::load_from(&path)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a config file, falling back to defaults when it is absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply SPHERE_* overrides.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var("SPHERE_API_URL") {
            self.api.url = url;
        }
        if let Some(secs) = var("SPHERE_REQUEST_TIMEOUT_SECS") {
            self.api.timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid SPHERE_REQUEST_TIMEOUT_SECS: {}", secs))?;
        }
        Ok(())
    }

    /// Get the config file path.
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SPHERE_CONFIG") {
            return Some(PathBuf::from(path));
        }
        ProjectDirs::from("", "", "sphere").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Settings handed to the core library.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(&self.api.url).with_timeout(Duration::from_secs(self.api.timeout_secs))
    }
}
