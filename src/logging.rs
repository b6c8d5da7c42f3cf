//! Tracing subscriber setup for the binary.
//!
//! Events go to a daily rolling file so stdout stays free for command output.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogConfig;

pub const DEFAULT_FILTER: &str = "anistream=info";
const LOG_FILE_PREFIX: &str = "anistream.log";

/// `RUST_LOG` wins over the configured filter, which wins over the default.
pub fn filter_for(config: &LogConfig) -> Result<EnvFilter> {
  if let Ok(filter) = EnvFilter::try_from_default_env() {
    return Ok(filter);
  }
  let directives = config.filter.as_deref().unwrap_or(DEFAULT_FILTER);
  EnvFilter::try_new(directives).map_err(|e| eyre!("Invalid log filter {:?}: {}", directives, e))
}

/// Install the global subscriber. Keep the returned guard alive until exit or
/// buffered events are lost.
pub fn init(config: &LogConfig, dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(filter_for(config)?)
    .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_invalid_filter_rejected() {
    if std::env::var("RUST_LOG").is_ok() {
      return;
    }
    let config = LogConfig {
      dir: None,
      filter: Some("anistream=[".to_string()),
    };
    assert!(filter_for(&config).is_err());
  }

  #[test]
  fn test_default_filter_parses() {
    let config = LogConfig::default();
    assert!(filter_for(&config).is_ok());
  }
}
