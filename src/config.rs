use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name used for config, data and log paths
pub const APP_NAME: &str = "fallcache";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Base URL of the catalog service (without the /api suffix)
  pub url: String,
  pub connect_timeout_secs: u64,
  pub read_timeout_secs: u64,
  /// Page size requested by `list`
  pub page_size: u32,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: "http://35.180.21.42:8080".to_string(),
      connect_timeout_secs: 30,
      read_timeout_secs: 30,
      page_size: 100,
    }
  }
}

/// What `get_by_id` does with a cached row when the service says it no longer exists.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MissingPolicy {
  /// Leave the cached row alone (it may reappear, e.g. after moderation)
  #[default]
  Keep,
  /// Delete the cached row
  Evict,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Database file (default: $XDG_DATA_HOME/fallcache/cache.db)
  pub path: Option<PathBuf>,
  /// Hours a synced catalog stays fresh before `list` refreshes it
  pub validity_hours: u64,
  pub on_missing: MissingPolicy,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      path: None,
      validity_hours: 6,
      on_missing: MissingPolicy::Keep,
    }
  }
}

impl CacheConfig {
  pub fn validity_window(&self) -> chrono::Duration {
    chrono::Duration::hours(self.validity_hours as i64)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// host:port pairs; each one reachable counts as a usable network
  pub probe_targets: Vec<String>,
  pub probe_interval_secs: u64,
  pub probe_timeout_millis: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_targets: vec!["1.1.1.1:443".to_string(), "8.8.8.8:53".to_string()],
      probe_interval_secs: 10,
      probe_timeout_millis: 1500,
    }
  }
}

impl ConnectivityConfig {
  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs.max(1))
  }

  pub fn probe_timeout(&self) -> Duration {
    Duration::from_millis(self.probe_timeout_millis)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fallcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fallcache/config.yaml
  ///
  /// Every field has a default, so no file at all is fine.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => {
        tracing::debug!("No configuration file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from(format!("{}.yaml", APP_NAME));
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_NAME).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the catalog bearer token from the environment, if any.
  ///
  /// Checks FALLCACHE_API_TOKEN. The token is passed through untouched.
  pub fn get_api_token() -> Option<String> {
    std::env::var("FALLCACHE_API_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }

  /// Directory for the cache database and log file.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join(APP_NAME))
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(path) => Ok(path.clone()),
      None => Ok(Self::data_dir()?.join("cache.db")),
    }
  }
}
