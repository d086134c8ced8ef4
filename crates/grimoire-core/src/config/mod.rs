//! Engine and remote configuration.
//!
//! `EngineConfig` tunes the sync engine; `RemoteConfig` says where the remote
//! document store lives. Both can be read from a JSON file and overridden
//! from `GRIMOIRE_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::remote::MAX_BATCH_WRITES;
use crate::util::normalize_text_option;

pub const DEFAULT_COLLECTION: &str = "characters";
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_MAX_CHARACTERS: usize = 3;

const ENV_SYNC_INTERVAL_SECS: &str = "GRIMOIRE_SYNC_INTERVAL_SECS";
const ENV_MAX_RETRIES: &str = "GRIMOIRE_MAX_RETRIES";
const ENV_BATCH_SIZE: &str = "GRIMOIRE_BATCH_SIZE";
const ENV_MAX_CHARACTERS: &str = "GRIMOIRE_MAX_CHARACTERS";
const ENV_REMOTE_URL: &str = "GRIMOIRE_REMOTE_URL";
const ENV_REMOTE_TOKEN: &str = "GRIMOIRE_REMOTE_TOKEN";

/// Sync engine tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Remote collection holding characters
    pub collection: String,
    /// Seconds between periodic drains while online
    pub sync_interval_secs: u64,
    /// Failed attempts tolerated before a queue entry is dropped
    pub max_retries: u32,
    /// Writes per atomic batch, never above the remote limit
    pub batch_size: usize,
    /// Characters one owner may keep
    pub max_characters: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            batch_size: MAX_BATCH_WRITES,
            max_characters: DEFAULT_MAX_CHARACTERS,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file; missing keys keep their defaults
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()
    }

    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval_secs = interval.as_secs();
        self
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub const fn with_max_characters(mut self, max_characters: usize) -> Self {
        self.max_characters = max_characters;
        self
    }

    /// Interval between periodic drains, at least one second
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    /// Batch size actually used, clamped to `1..=MAX_BATCH_WRITES`
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_WRITES)
    }

    /// Apply `GRIMOIRE_*` overrides from the process environment
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn apply_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = parse_override(&lookup, ENV_SYNC_INTERVAL_SECS)? {
            self.sync_interval_secs = value;
        }
        if let Some(value) = parse_override(&lookup, ENV_MAX_RETRIES)? {
            self.max_retries = value;
        }
        if let Some(value) = parse_override(&lookup, ENV_BATCH_SIZE)? {
            self.batch_size = value;
        }
        if let Some(value) = parse_override(&lookup, ENV_MAX_CHARACTERS)? {
            self.max_characters = value;
        }
        self.validate()
    }

    fn validate(mut self) -> Result<Self> {
        self.collection = normalize_text_option(Some(self.collection))
            .ok_or_else(|| Error::InvalidInput("collection must not be empty".into()))?;
        if self.batch_size > MAX_BATCH_WRITES {
            tracing::warn!(
                "batch_size {} exceeds the remote limit, using {MAX_BATCH_WRITES}",
                self.batch_size
            );
        }
        self.batch_size = self.effective_batch_size();
        Ok(self)
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = normalize_text_option(lookup(key)) else {
        return Ok(None);
    };
    raw.parse()
        .map(Some)
        .map_err(|_| Error::InvalidInput(format!("{key} has an invalid value '{raw}'")))
}

/// Where the remote document store lives
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            auth_token,
        }
    }

    /// Build from `GRIMOIRE_REMOTE_URL` / `GRIMOIRE_REMOTE_TOKEN`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            base_url: normalize_text_option(lookup(ENV_REMOTE_URL)),
            auth_token: normalize_text_option(lookup(ENV_REMOTE_TOKEN)),
        }
    }

    /// Check if a remote is configured
    pub const fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.collection, "characters");
        assert_eq!(config.sync_interval(), Duration::from_secs(30));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.max_characters, 3);
    }

    #[test]
    fn batch_size_is_clamped_to_remote_limit() {
        let config = EngineConfig::default().with_batch_size(10_000);
        assert_eq!(config.effective_batch_size(), MAX_BATCH_WRITES);
        assert_eq!(EngineConfig::default().with_batch_size(0).effective_batch_size(), 1);
    }

    #[test]
    fn env_overrides_apply() {
        let config = EngineConfig::default()
            .apply_overrides_from(lookup(&[
                ("GRIMOIRE_SYNC_INTERVAL_SECS", "5"),
                ("GRIMOIRE_MAX_RETRIES", "2"),
                ("GRIMOIRE_BATCH_SIZE", "900"),
            ]))
            .unwrap();
        assert_eq!(config.sync_interval_secs, 5);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.batch_size, MAX_BATCH_WRITES);
        assert_eq!(config.max_characters, 3);
    }

    #[test]
    fn env_override_rejects_garbage() {
        let result = EngineConfig::default()
            .apply_overrides_from(lookup(&[("GRIMOIRE_MAX_RETRIES", "lots")]));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn load_from_path_keeps_defaults_for_missing_keys() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("engine.json");
        std::fs::write(&path, r#"{ "max_retries": 9 }"#).unwrap();

        let config = EngineConfig::load_from_path(&path).unwrap();
        assert_eq!(config.max_retries, 9);
        assert_eq!(config.collection, "characters");
    }

    #[test]
    fn load_from_path_rejects_unknown_keys() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("engine.json");
        std::fs::write(&path, r#"{ "retries": 9 }"#).unwrap();

        assert!(EngineConfig::load_from_path(&path).is_err());
    }

    #[test]
    fn remote_config_from_lookup() {
        let config = RemoteConfig::from_lookup(lookup(&[
            ("GRIMOIRE_REMOTE_URL", " https://api.example.com "),
            ("GRIMOIRE_REMOTE_TOKEN", ""),
        ]));
        assert!(config.is_configured());
        assert_eq!(config.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.auth_token, None);
        assert!(!RemoteConfig::default().is_configured());
    }
}
