//! Configuration for scribe
//!
//! Stored as TOML in `<config_dir>/scribe/config.toml`. Loading falls back
//! to defaults on any I/O or parse error (graceful degradation); explicit
//! values can still be overridden per-invocation by the CLI.

use crate::checkout::CreditBundle;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// scribe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScribeConfig {
    /// Base URL of the platform API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Identity token of the signed-in user; absent until sign-in
    #[serde(default)]
    pub identity: Option<String>,

    /// Per-call timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// The credit bundle offered when the balance runs out
    #[serde(default = "default_bundle")]
    pub bundle: CreditBundle,
}

fn default_api_base_url() -> String {
    "https://platform.scribe.dev".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_bundle() -> CreditBundle {
    CreditBundle {
        credit_type: "generation".to_string(),
        quantity: 10,
        unit_price_minor_units: 99,
        line_item_label: "Generation credits (10 pack)".to_string(),
    }
}

impl Default for ScribeConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            identity: None,
            request_timeout_secs: default_request_timeout_secs(),
            bundle: default_bundle(),
        }
    }
}

impl ScribeConfig {
    /// Default config file location: `<config_dir>/scribe/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("scribe");
        Ok(dir.join("config.toml"))
    }

    /// Load from `path`. Returns defaults on any I/O or parse error.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    /// Persist to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScribeConfig::load(&dir.path().join("config.toml"));
        assert_eq!(config.api_base_url, default_api_base_url());
        assert!(config.identity.is_none());
        assert_eq!(config.bundle.quantity, 10);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ScribeConfig::default();
        config.identity = Some("user-1".to_string());
        config.request_timeout_secs = 5;
        config.save(&path).unwrap();

        let loaded = ScribeConfig::load(&path);
        assert_eq!(loaded.identity.as_deref(), Some("user-1"));
        assert_eq!(loaded.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not [valid toml").unwrap();

        let config = ScribeConfig::load(&path);
        assert_eq!(config.request_timeout_secs, default_request_timeout_secs());
    }
}
