use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::service::ServiceConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  /// Override for the database/log location (defaults to the platform
  /// data directory)
  pub data_dir: Option<PathBuf>,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// Base URL of the hosted backend, e.g. https://api.example.com/v1
  pub url: String,
  /// Bounded wait for a single network attempt
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Background refresh / queue-drain fallback cadence
  pub refresh_interval_secs: u64,
  /// How often connectivity is probed
  pub probe_interval_secs: u64,
  /// Delay before the post-mutation authoritative refresh
  pub reconcile_delay_ms: u64,
  /// How long a cached read short-circuits the network
  pub cache_fresh_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      refresh_interval_secs: 30,
      probe_interval_secs: 5,
      reconcile_delay_ms: 100,
      cache_fresh_secs: 300,
    }
  }
}

fn default_timeout_secs() -> u64 {
  10
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./khata.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/khata/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/khata/config.yaml\n\
                 with at least a backend url."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("khata.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("khata").join("config.yaml");
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

  /// The backend API token, if the environment provides one.
  ///
  /// Checks KHATA_API_TOKEN.
  pub fn api_token() -> Option<String> {
    std::env::var("KHATA_API_TOKEN").ok()
  }

  /// Tunables for the service graph.
  pub fn service_config(&self) -> ServiceConfig {
    ServiceConfig {
      base_url: self.backend.url.clone(),
      api_token: Self::api_token(),
      fresh_for: chrono::Duration::seconds(self.sync.cache_fresh_secs as i64),
      net_timeout: Duration::from_secs(self.backend.timeout_secs),
      reconcile_delay: Duration::from_millis(self.sync.reconcile_delay_ms),
    }
  }

  pub fn net_timeout(&self) -> Duration {
    Duration::from_secs(self.backend.timeout_secs)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.sync.probe_interval_secs)
  }

  pub fn refresh_interval(&self) -> Duration {
    Duration::from_secs(self.sync.refresh_interval_secs)
  }
}
