use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{GmailError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub label: LabelConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    /// Label replied messages are moved under
    #[serde(default = "default_label_name")]
    pub name: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            name: default_label_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Lower bound of the delay between cycles, inclusive
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
    /// Upper bound of the delay between cycles, inclusive
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
    /// Upper bound on any single Gmail API call
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl PollConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Address the `serve` command listens on
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_label_name() -> String {
    "Auto-Reply".to_string()
}

fn default_min_interval_secs() -> u64 {
    45
}

fn default_max_interval_secs() -> u64 {
    120
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| GmailError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GmailError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let name = self.label.name.trim();
        if name.is_empty() {
            return Err(GmailError::ConfigError(
                "label.name cannot be empty".to_string(),
            ));
        }
        // Gmail rejects label names longer than 225 characters
        if name.chars().count() > 225 {
            return Err(GmailError::ConfigError(
                "label.name cannot exceed 225 characters".to_string(),
            ));
        }

        if self.poll.min_interval_secs == 0 {
            return Err(GmailError::ConfigError(
                "poll.min_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.poll.min_interval_secs > self.poll.max_interval_secs {
            return Err(GmailError::ConfigError(format!(
                "poll.min_interval_secs ({}) cannot exceed poll.max_interval_secs ({})",
                self.poll.min_interval_secs, self.poll.max_interval_secs
            )));
        }
        if self.poll.call_timeout_secs == 0 {
            return Err(GmailError::ConfigError(
                "poll.call_timeout_secs must be greater than 0".to_string(),
            ));
        }

        self.trigger_addr()?;

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Parsed `trigger.bind`
    pub fn trigger_addr(&self) -> Result<SocketAddr> {
        self.trigger.bind.parse().map_err(|e| {
            GmailError::ConfigError(format!(
                "Invalid trigger.bind '{}': {}",
                self.trigger.bind, e
            ))
        })
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        Self::default().save(path).await
    }
}
