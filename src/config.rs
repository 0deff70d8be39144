//! Configuration file support for husk.
//!
//! Reads `~/.config/husk/config.toml`.
//!
//! ## Example config
//!
//! ```toml
//! [engine]
//! stop_timeout_secs = 10
//!
//! [run]
//! exec_mode = "direct"
//! ```
//!
//! CLI flags override config values. A missing file yields defaults; a
//! present but malformed file is an error.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{HuskError, Result};
use crate::runner::ExecMode;

/// Engine-related settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Grace period in seconds when stopping a container.
    pub stop_timeout_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 10,
        }
    }
}

/// Run behavior settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Default execution mode when `--exec-mode` is not given.
    pub exec_mode: Option<ExecMode>,
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub run: RunConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();

        if !path.exists() {
            tracing::debug!("no config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| HuskError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config = toml::from_str(&contents).map_err(|e| HuskError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;

        tracing::debug!("loaded config from {:?}", path);
        Ok(config)
    }

    /// Default config file path: `~/.config/husk/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("husk")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.engine.stop_timeout_secs, 10);
        assert_eq!(config.run.exec_mode, None);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[engine]
stop_timeout_secs = 3

[run]
exec_mode = "direct"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.engine.stop_timeout_secs, 3);
        assert_eq!(config.run.exec_mode, Some(ExecMode::Direct));
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not = [toml").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(HuskError::ConfigParse { .. })
        ));
    }

    #[test]
    fn default_path_ends_with_crate_dir() {
        let path = Config::default_path();
        assert!(path.ends_with("husk/config.toml"));
    }
}
