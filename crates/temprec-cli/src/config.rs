//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use temprec_core::{DEFAULT_DEVICE_NAME, DEFAULT_SCAN_DURATION};

use crate::cli::OutputFormat;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Advertised name of the thermometer
    #[serde(default)]
    pub device: Option<String>,

    /// Scan window in seconds
    #[serde(default)]
    pub scan_timeout: Option<u64>,

    /// Default output format ("text" or "json")
    #[serde(default)]
    pub format: Option<String>,

    /// Disable colored output
    #[serde(default)]
    pub no_color: bool,
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("temprec")
            .join("config.toml")
    }

    /// Load config from the default path, or return default if not found
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`. Unreadable or malformed files fall back to defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config: {}", e);
            }
        }
        Self::default()
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    /// Save config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// A config with every built-in default written out, for `config init`.
    pub fn starter() -> Self {
        Self {
            device: Some(DEFAULT_DEVICE_NAME.to_string()),
            scan_timeout: Some(DEFAULT_SCAN_DURATION.as_secs()),
            format: Some("text".to_string()),
            no_color: false,
        }
    }
}

/// Resolve the target name.
///
/// `device` already folds in the `TEMPREC_DEVICE` env var (clap reads it),
/// so the order is flag, env var, config file, built-in default.
pub fn resolve_device(device: Option<String>, config: &Config) -> String {
    device
        .filter(|d| !d.is_empty())
        .or_else(|| config.device.clone().filter(|d| !d.is_empty()))
        .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string())
}

/// Resolve the scan window: flag, then config, then the built-in default.
///
/// A zero at either level counts as unset.
pub fn resolve_timeout(timeout: Option<u64>, config: &Config) -> Duration {
    let positive = |secs: &u64| *secs > 0;
    timeout
        .filter(positive)
        .or(config.scan_timeout.filter(positive))
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_SCAN_DURATION)
}

/// Resolve the output format: flag, then config, then text.
pub fn resolve_format(format: Option<OutputFormat>, config: &Config) -> OutputFormat {
    format
        .or_else(|| {
            config
                .format
                .as_deref()
                .and_then(|f| OutputFormat::from_str(f, true).ok())
        })
        .unwrap_or_default()
}
