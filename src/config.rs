use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin of the application (scheme, host and port), e.g. "https://feedme.example"
  pub origin: String,
  /// Cache namespace identifier; changing it on deploy evicts the previous namespace
  #[serde(default = "default_cache_version")]
  pub cache_version: String,
  /// Absolute paths pre-cached at install time (all-or-nothing)
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
  /// Path prefix of the live-session transport, never intercepted
  #[serde(default = "default_realtime_prefix")]
  pub realtime_prefix: String,
  /// Background sync tag that triggers replay of pending actions
  #[serde(default = "default_sync_tag")]
  pub sync_tag: String,
  #[serde(default = "default_network_timeout_secs")]
  pub network_timeout_secs: u64,
  /// SQLite database path (default: $XDG_DATA_HOME/feedme-offline/offline.db)
  pub database: Option<PathBuf>,
  #[serde(default)]
  pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
  #[serde(default = "default_icon")]
  pub icon: String,
  #[serde(default = "default_badge")]
  pub badge: String,
  #[serde(default = "default_vibrate")]
  pub vibrate: Vec<u32>,
  /// Target used when a push payload carries no url
  #[serde(default = "default_target_url")]
  pub default_url: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      icon: default_icon(),
      badge: default_badge(),
      vibrate: default_vibrate(),
      default_url: default_target_url(),
    }
  }
}

fn default_cache_version() -> String {
  "feedme-v1".to_string()
}

fn default_manifest() -> Vec<String> {
  [
    "/",
    "/assets/app.css",
    "/assets/app.js",
    "/manifest.json",
    "/images/logo.svg",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

fn default_offline_page() -> String {
  "/offline.html".to_string()
}

fn default_realtime_prefix() -> String {
  "/live".to_string()
}

fn default_sync_tag() -> String {
  "sync-shopping-list".to_string()
}

fn default_network_timeout_secs() -> u64 {
  30
}

fn default_icon() -> String {
  "/images/icon-192.png".to_string()
}

fn default_badge() -> String {
  "/images/badge.png".to_string()
}

fn default_vibrate() -> Vec<u32> {
  vec![100, 50, 100]
}

fn default_target_url() -> String {
  "/".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./feedme-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/feedme-offline/config.yaml
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
        "No configuration file found. Create one at ~/.config/feedme-offline/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("feedme-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("feedme-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  /// Parse and validate configuration from YAML text.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.origin_url()?;

    if self.cache_version.trim().is_empty() {
      return Err(eyre!("cache_version must not be empty"));
    }

    if let Some(bad) = self.manifest.iter().find(|p| !p.starts_with('/')) {
      return Err(eyre!("Manifest entries must be absolute paths, got '{}'", bad));
    }

    if self.network_timeout_secs == 0 {
      return Err(eyre!("network_timeout_secs must be at least 1"));
    }

    Ok(())
  }

  /// The application origin as a parsed URL.
  pub fn origin_url(&self) -> Result<Url> {
    let url =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;

    if url.cannot_be_a_base() {
      return Err(eyre!("Origin '{}' cannot be used as a base URL", self.origin));
    }

    Ok(url)
  }

  pub fn network_timeout(&self) -> Duration {
    Duration::from_secs(self.network_timeout_secs)
  }

  /// Get the database path, falling back to the user data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }

    Ok(data_dir()?.join("offline.db"))
  }
}

/// Per-user data directory for the database and logs.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("feedme-offline"))
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
  Config::from_yaml("origin: https://feedme.test\nmanifest: ['/', '/assets/app.css']\n")
    .expect("test config")
}
