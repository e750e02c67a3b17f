//! Configuration handling for the persistconn binary.
//!
//! Settings come from a YAML file, then `PERSISTCONN_*` environment
//! variables, then command-line flags (applied by `main`).

use anyhow::{Context, Result};
use pconn_session::{EngineConfig, InitBlockMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "persistconn.yaml";

/// Binary configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConnConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Dispatch engine settings
    pub engine: EngineConfig,
}

impl Default for PersistConnConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            engine: EngineConfig::default(),
        }
    }
}

/// Where the file-level settings came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    /// Parsed from this file
    File(PathBuf),
    /// File was absent; built-in defaults
    Defaults(PathBuf),
}

/// A loaded configuration plus what shaped it.
///
/// Logging is not up yet while loading, so `main` reports these afterwards.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: PersistConnConfig,
    pub origin: ConfigOrigin,
    /// Environment variables that overrode a setting
    pub overrides: Vec<&'static str>,
}

impl PersistConnConfig {
    /// Load from `config_path` (missing file means defaults), then apply the environment
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<LoadedConfig> {
        let path = config_path.as_ref();

        let (mut config, origin) = match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = Self::from_yaml(&content)
                    .with_context(|| format!("invalid config file {:?}", path))?;
                (config, ConfigOrigin::File(path.to_path_buf()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                (Self::default(), ConfigOrigin::Defaults(path.to_path_buf()))
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read config file {:?}", path))
            }
        };

        let overrides = config.apply_overrides(|key| std::env::var(key).ok())?;

        Ok(LoadedConfig {
            config,
            origin,
            overrides,
        })
    }

    /// Parse a YAML document; an empty document yields defaults
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `PERSISTCONN_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<Vec<&'static str>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();

        if let Some(level) = lookup("PERSISTCONN_LOG_LEVEL") {
            self.log_level = level;
            applied.push("PERSISTCONN_LOG_LEVEL");
        }

        if let Some(mode) = lookup("PERSISTCONN_INIT_BLOCK_MODE") {
            self.engine.init_block_mode = mode
                .parse::<InitBlockMode>()
                .map_err(anyhow::Error::msg)
                .context("PERSISTCONN_INIT_BLOCK_MODE")?;
            applied.push("PERSISTCONN_INIT_BLOCK_MODE");
        }

        if let Some(limit) = lookup("PERSISTCONN_MAX_CONCURRENCY") {
            let limit: usize = limit.parse().context("PERSISTCONN_MAX_CONCURRENCY")?;
            // 0 lifts the limit
            self.engine.max_concurrency = (limit > 0).then_some(limit);
            applied.push("PERSISTCONN_MAX_CONCURRENCY");
        }

        if let Some(timeout) = lookup("PERSISTCONN_HANDLER_TIMEOUT") {
            self.engine.handler_timeout = if timeout.trim().is_empty() || timeout == "0" {
                None
            } else {
                Some(humantime::parse_duration(&timeout).context("PERSISTCONN_HANDLER_TIMEOUT")?)
            };
            applied.push("PERSISTCONN_HANDLER_TIMEOUT");
        }

        if let Some(max) = lookup("PERSISTCONN_MAX_STRING_LEN") {
            self.engine.max_string_len = max.parse().context("PERSISTCONN_MAX_STRING_LEN")?;
            applied.push("PERSISTCONN_MAX_STRING_LEN");
        }

        Ok(applied)
    }
}
