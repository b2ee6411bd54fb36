// Configuration management for the keybeacon CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/keybeacon/config.json
// - Linux: ~/.config/keybeacon/config.json
// - Windows: %APPDATA%\keybeacon\config.json

use anyhow::{Context, Result};
use keybeacon_core::accessory::DEFAULT_PROVISIONING_GRACE;
use keybeacon_core::directory::{DEFAULT_DIRECTORY_URL, DEFAULT_HTTP_TIMEOUT};
use keybeacon_core::tracking::{DEFAULT_EVICTION_HORIZON, DEFAULT_STALE_WINDOW};
use keybeacon_core::{
    AccessoryConfig, CollectorConfig, DirectoryConfig, NodeConfig, ProvisionConfig,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Accessory key file name inside the data directory
pub const TAG_KEY_FILE: &str = "tag.key";
/// Owner private key (PKCS#8 PEM)
pub const OWNER_PRIVATE_FILE: &str = "owner_private.pem";
/// Owner public key (SubjectPublicKeyInfo PEM)
pub const OWNER_PUBLIC_FILE: &str = "owner_public.pem";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the report directory
    pub directory_url: String,

    /// Where keys are kept; platform data dir when unset
    pub data_dir: Option<String>,

    /// Seconds without a sighting before a tag's fragments are discarded
    pub stale_window_secs: u64,

    /// Seconds without a sighting before a tag is evicted entirely
    pub eviction_horizon_secs: u64,

    pub sweep_interval_secs: u64,

    /// Capacity of the sighting queue between scan task and main loop
    pub queue_capacity: usize,

    pub poll_interval_ms: u64,

    /// Seconds the provisioning service stays up after the key is stored
    pub provisioning_grace_secs: u64,

    /// How long owner-set waits for a config-mode tag
    pub config_candidate_window_secs: u64,

    pub http_timeout_secs: u64,

    /// Directory for daily log files; stderr only when unset
    pub log_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory_url: DEFAULT_DIRECTORY_URL.to_string(),
            data_dir: None,
            stale_window_secs: DEFAULT_STALE_WINDOW.as_secs(),
            eviction_horizon_secs: DEFAULT_EVICTION_HORIZON.as_secs(),
            sweep_interval_secs: 60,
            queue_capacity: keybeacon_core::node::DEFAULT_QUEUE_CAPACITY,
            poll_interval_ms: 500,
            provisioning_grace_secs: DEFAULT_PROVISIONING_GRACE.as_secs(),
            config_candidate_window_secs: 60,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT.as_secs(),
            log_dir: None,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("keybeacon");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the platform data directory path (cross-platform)
    pub fn default_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("keybeacon");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    /// Data directory honoring the `data_dir` override
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => {
                let dir = PathBuf::from(dir);
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
                Ok(dir)
            }
            None => Self::default_data_dir(),
        }
    }

    pub fn tag_key_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(TAG_KEY_FILE))
    }

    pub fn owner_key_paths(&self) -> Result<(PathBuf, PathBuf)> {
        let dir = self.data_dir()?;
        Ok((dir.join(OWNER_PRIVATE_FILE), dir.join(OWNER_PUBLIC_FILE)))
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        if config_file.exists() {
            let contents =
                std::fs::read_to_string(&config_file).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_file, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Reject timing values a hand-edited file could set to zero
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("stale_window_secs", self.stale_window_secs),
            ("eviction_horizon_secs", self.eviction_horizon_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
        ] {
            if value == 0 {
                anyhow::bail!("{} must be greater than zero", key);
            }
        }
        Ok(())
    }

    /// Set a config value and persist it
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.apply(key, value)?;
        self.save()
    }

    /// Set a config value in memory only
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "directory_url" => {
                if value.is_empty() {
                    anyhow::bail!("directory_url cannot be empty");
                }
                self.directory_url = value.trim_end_matches('/').to_string();
            }
            "data_dir" => self.data_dir = optional(value),
            "log_dir" => self.log_dir = optional(value),
            "stale_window_secs" => {
                self.stale_window_secs = positive(value)?;
            }
            "eviction_horizon_secs" => {
                self.eviction_horizon_secs = positive(value)?;
            }
            "sweep_interval_secs" => {
                self.sweep_interval_secs = positive(value)?;
            }
            "queue_capacity" => {
                self.queue_capacity = positive(value)? as usize;
            }
            "poll_interval_ms" => {
                self.poll_interval_ms = positive(value)?;
            }
            "provisioning_grace_secs" => {
                self.provisioning_grace_secs = value.parse().context("Invalid number")?;
            }
            "config_candidate_window_secs" => {
                self.config_candidate_window_secs = value.parse().context("Invalid number")?;
            }
            "http_timeout_secs" => {
                self.http_timeout_secs = positive(value)?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "directory_url" => Some(self.directory_url.clone()),
            "data_dir" => self.data_dir.clone(),
            "log_dir" => self.log_dir.clone(),
            "stale_window_secs" => Some(self.stale_window_secs.to_string()),
            "eviction_horizon_secs" => Some(self.eviction_horizon_secs.to_string()),
            "sweep_interval_secs" => Some(self.sweep_interval_secs.to_string()),
            "queue_capacity" => Some(self.queue_capacity.to_string()),
            "poll_interval_ms" => Some(self.poll_interval_ms.to_string()),
            "provisioning_grace_secs" => Some(self.provisioning_grace_secs.to_string()),
            "config_candidate_window_secs" => Some(self.config_candidate_window_secs.to_string()),
            "http_timeout_secs" => Some(self.http_timeout_secs.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("directory_url".to_string(), self.directory_url.clone()),
            (
                "data_dir".to_string(),
                self.data_dir.clone().unwrap_or_else(|| "(auto)".to_string()),
            ),
            (
                "log_dir".to_string(),
                self.log_dir.clone().unwrap_or_else(|| "(stderr)".to_string()),
            ),
            ("stale_window_secs".to_string(), format!("{}s", self.stale_window_secs)),
            ("eviction_horizon_secs".to_string(), format!("{}s", self.eviction_horizon_secs)),
            ("sweep_interval_secs".to_string(), format!("{}s", self.sweep_interval_secs)),
            ("queue_capacity".to_string(), self.queue_capacity.to_string()),
            ("poll_interval_ms".to_string(), format!("{}ms", self.poll_interval_ms)),
            ("provisioning_grace_secs".to_string(), format!("{}s", self.provisioning_grace_secs)),
            (
                "config_candidate_window_secs".to_string(),
                format!("{}s", self.config_candidate_window_secs),
            ),
            ("http_timeout_secs".to_string(), format!("{}s", self.http_timeout_secs)),
        ]
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig::default()
            .with_stale_window(Duration::from_secs(self.stale_window_secs))
            .with_eviction_horizon(Duration::from_secs(self.eviction_horizon_secs))
    }

    pub fn node_config(&self) -> NodeConfig {
        NodeConfig::default()
            .with_queue_capacity(self.queue_capacity)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_sweep_interval(Duration::from_secs(self.sweep_interval_secs))
            .with_collector(self.collector_config())
    }

    pub fn accessory_config(&self) -> AccessoryConfig {
        AccessoryConfig::default()
            .with_provisioning_grace(Duration::from_secs(self.provisioning_grace_secs))
    }

    pub fn directory_config(&self) -> DirectoryConfig {
        DirectoryConfig::default()
            .with_base_url(self.directory_url.clone())
            .with_timeout(Duration::from_secs(self.http_timeout_secs))
    }

    pub fn provision_config(&self) -> ProvisionConfig {
        ProvisionConfig::default()
            .with_candidate_window(Duration::from_secs(self.config_candidate_window_secs))
    }
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn positive(value: &str) -> Result<u64> {
    let parsed: u64 = value.parse().context("Invalid number")?;
    if parsed == 0 {
        anyhow::bail!("Value must be greater than zero");
    }
    Ok(parsed)
}
