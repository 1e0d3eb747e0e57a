use anyhow::{Context, Result};
use dirs::home_dir;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::storage::default_installation_key_path;
use crate::transport::DEFAULT_BASE_URL;

pub const DEFAULT_NAME: &str = "La Marzocco";
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 30;

/// Configuration data stored in ~/.lm-switch.yml. Every field is optional in
/// the file so flags and environment variables can fill the gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installation_key_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Fully resolved settings for running the switch
#[derive(Debug, Clone)]
pub struct SwitchSettings {
    pub name: String,
    pub serial: String,
    pub username: String,
    pub password: String,
    pub installation_key_path: PathBuf,
    /// Zero disables polling
    pub poll_interval: Duration,
    pub base_url: String,
}

impl Config {
    /// Overlay the fields set in `overrides` on top of this config
    pub fn merge(self, overrides: Config) -> Config {
        Config {
            name: overrides.name.or(self.name),
            serial: overrides.serial.or(self.serial),
            username: overrides.username.or(self.username),
            password: overrides.password.or(self.password),
            installation_key_path: overrides
                .installation_key_path
                .or(self.installation_key_path),
            poll_interval_seconds: overrides
                .poll_interval_seconds
                .or(self.poll_interval_seconds),
            base_url: overrides.base_url.or(self.base_url),
        }
    }

    pub fn resolve(self) -> Result<SwitchSettings> {
        let present = |value: Option<String>| value.filter(|value| !value.is_empty());
        let (Some(serial), Some(username), Some(password)) = (
            present(self.serial),
            present(self.username),
            present(self.password),
        ) else {
            return Err(anyhow::anyhow!(
                "Missing required config. Please set serial, username, and password."
            ));
        };

        let installation_key_path = match self.installation_key_path {
            Some(path) => path,
            None => default_installation_key_path()?,
        };

        Ok(SwitchSettings {
            name: self.name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
            serial,
            username,
            password,
            installation_key_path,
            poll_interval: Duration::from_secs(
                self.poll_interval_seconds
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECONDS),
            ),
            base_url: self
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }
}

/// Get the path to the configuration file (~/.lm-switch.yml)
pub fn get_config_path() -> Result<PathBuf> {
    let home = home_dir().context("Failed to determine home directory")?;
    Ok(home.join(".lm-switch.yml"))
}

/// Load configuration from `path`, or from the default location.
///
/// A missing file at the default location yields an empty config; a missing
/// file that was asked for explicitly is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default_path = get_config_path()?;
            if !default_path.exists() {
                debug!("No configuration file at {}", default_path.display());
                return Ok(Config::default());
            }
            default_path
        }
    };

    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
    let config: Config = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

    debug!("Loaded configuration from {}", config_path.display());
    Ok(config)
}
