//! Persistent CLI configuration.

use std::path::{Path, PathBuf};

use grimoire_core::config::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub owner: Option<String>,
    /// Used when `GRIMOIRE_REMOTE_URL` is unset
    pub remote_url: Option<String>,
    pub engine: EngineConfig,
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("grimoire")
        .join(CONFIG_FILE_NAME)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("grimoire")
        .join("grimoire.db")
}

impl CliConfig {
    pub fn load() -> Result<Self, CliError> {
        Self::load_from_path(&default_config_path())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|error| {
            CliError::Config(format!("Failed to read config at {}: {error}", path.display()))
        })?;
        let mut config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            CliError::Config(format!("Failed to parse config at {}: {error}", path.display()))
        })?;
        config.normalize();
        Ok(config)
    }

    fn normalize(&mut self) {
        self.owner = grimoire_core::util::normalize_text_option(self.owner.take());
        self.remote_url = grimoire_core::util::normalize_text_option(self.remote_url.take());
    }
}
