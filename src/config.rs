use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable overriding `backend.url`.
pub const BACKEND_URL_ENV: &str = "ANISTREAM_BACKEND_URL";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
  pub backend: BackendConfig,
  pub storage: StorageConfig,
  pub playback: PlaybackConfig,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
  pub url: String,
  /// Per-request timeout
  pub timeout_secs: u64,
}

impl Default for BackendConfig {
  fn default() -> Self {
    Self {
      url: "http://127.0.0.1:5000".to_string(),
      timeout_secs: 15,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
  /// Database file (defaults to $XDG_DATA_HOME/anistream/cache.db)
  pub path: Option<PathBuf>,
  /// Keep everything in memory for the lifetime of the process
  pub in_memory: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlaybackConfig {
  pub autosave_secs: u64,
  /// Mirror positions and last-watched pointers to the backend session
  pub mirror_to_server: bool,
}

impl Default for PlaybackConfig {
  fn default() -> Self {
    Self {
      autosave_secs: 5,
      mirror_to_server: true,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
  /// Log directory (defaults to $XDG_DATA_HOME/anistream/logs)
  pub dir: Option<PathBuf>,
  /// tracing filter directive, e.g. "anistream=debug"
  pub filter: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./anistream.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/anistream/config.yaml
  ///
  /// Without a file every setting takes its default.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    Ok(config.with_env_overrides(std::env::var(BACKEND_URL_ENV).ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("anistream.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("anistream").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file is valid and means "all defaults"
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    if config.playback.autosave_secs == 0 {
      return Err(eyre!("playback.autosave_secs must be at least 1"));
    }
    if config.backend.timeout_secs == 0 {
      return Err(eyre!("backend.timeout_secs must be at least 1"));
    }
    Ok(config)
  }

  fn with_env_overrides(mut self, backend_url: Option<String>) -> Self {
    if let Some(url) = backend_url.filter(|u| !u.trim().is_empty()) {
      self.backend.url = url;
    }
    self
  }

  /// Directory for rolling log files.
  pub fn log_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.log.dir {
      return Ok(dir.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;
    Ok(data_dir.join("anistream").join("logs"))
  }
}
