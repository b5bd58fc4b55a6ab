use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete configuration (saved to config/settings.toml)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root of the gallery cache; relative paths resolve against the config directory
    pub directory: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: crate::util::paths::resolve_default_cache_directory(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Total attempts per page request before the gallery restarts
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Whole-gallery restarts before giving up
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_max_restarts() -> u32 {
    8
}

fn default_restart_delay_ms() -> u64 {
    1000
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            max_restarts: default_max_restarts(),
            restart_delay_ms: default_restart_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Base URL of the gallery metadata service
    pub metadata_base_url: String,
    pub user_agent: String,
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_pool_max_idle_per_host() -> usize {
    16
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            metadata_base_url: "http://127.0.0.1:8080/galleries/".to_string(),
            user_agent: concat!("folio/", env!("CARGO_PKG_VERSION")).to_string(),
            referer: None,
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
        }
    }
}

impl Config {
    /// Load settings.toml from the config directory; a missing file means defaults
    pub fn load() -> anyhow::Result<Self> {
        let config_path = crate::util::paths::get_app_config_path()?;

        if !config_path.exists() {
            tracing::info!("Config not found at {:?}, using defaults", config_path);
            return Ok(Self::default());
        }

        let mut config = Self::load_from(&config_path)?;
        config.cache.directory = crate::util::paths::resolve_relative_to_config(&config.cache.directory);
        Ok(config)
    }

    /// Save settings.toml to the config directory
    pub fn save(&self) -> anyhow::Result<PathBuf> {
        let config_path = crate::util::paths::get_app_config_path()?;
        self.save_to(&config_path)?;
        tracing::info!("Saved config to {:?}", config_path);
        Ok(config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context(format!("Failed to read {:?}", path))?;
        let config: Self = toml::from_str(&content).context(format!("Failed to parse {:?}", path))?;

        if let Err(errors) = crate::app::settings::validate_config(&config) {
            return Err(anyhow::anyhow!(
                "Invalid configuration: {}",
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        Ok(config)
    }

    /// Atomic write using temp file + rename
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        if let Err(errors) = crate::app::settings::validate_config(self) {
            return Err(anyhow::anyhow!(
                "Cannot save invalid config: {}",
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &content).context("Failed to write temp config file")?;
        std::fs::rename(&temp_path, path).context("Failed to rename temp config file")?;
        Ok(())
    }
}
