//! Application configuration management.
//!
//! Configuration is stored at `~/.config/sessionkit/config.json`. Every
//! field has a default, so a missing or partial file is fine. A handful of
//! `SESSIONKIT_*` environment variables override the file.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::client::REQUEST_TIMEOUT_SECS;
use crate::auth::{DEFAULT_RENEWAL_BUFFER_SECS, DEFAULT_TOKEN_TTL_SECS};
use crate::store::keychain::DEFAULT_SERVICE_NAME;

/// Application name used for config/data directory paths
const APP_NAME: &str = "sessionkit";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";

pub const ENV_API_URL: &str = "SESSIONKIT_API_URL";
pub const ENV_TIMEOUT_SECS: &str = "SESSIONKIT_TIMEOUT_SECS";
pub const ENV_RENEWAL_BUFFER_SECS: &str = "SESSIONKIT_RENEWAL_BUFFER_SECS";
pub const ENV_STORAGE: &str = "SESSIONKIT_STORAGE";
pub const ENV_BACKEND: &str = "SESSIONKIT_BACKEND";
pub const ENV_STORE_PASSPHRASE: &str = "SESSIONKIT_STORE_PASSPHRASE";

/// Where credentials are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Platform keychain
    #[default]
    Keyring,
    /// Passphrase-encrypted files under the data directory
    File,
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(StorageKind::Keyring),
            "file" => Ok(StorageKind::File),
            other => Err(format!("unknown storage kind '{}'", other)),
        }
    }
}

/// Which auth backend to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Http,
    /// In-process backend with a seeded demo account
    Demo,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(BackendKind::Http),
            "demo" => Ok(BackendKind::Demo),
            other => Err(format!("unknown backend kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub renewal_buffer_secs: i64,
    pub default_token_ttl_secs: i64,
    pub storage: StorageKind,
    pub backend: BackendKind,
    /// Keychain service name
    pub service_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            renewal_buffer_secs: DEFAULT_RENEWAL_BUFFER_SECS,
            default_token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            storage: StorageKind::default(),
            backend: BackendKind::default(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            last_email: None,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Override fields from variables returned by `lookup`. Unparsable
    /// values are logged and ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_base_url = url;
        }
        override_parsed(&mut self.request_timeout_secs, ENV_TIMEOUT_SECS, &lookup);
        override_parsed(&mut self.renewal_buffer_secs, ENV_RENEWAL_BUFFER_SECS, &lookup);
        override_parsed(&mut self.storage, ENV_STORAGE, &lookup);
        override_parsed(&mut self.backend, ENV_BACKEND, &lookup);
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the encrypted credential files and logs
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn renewal_buffer(&self) -> chrono::Duration {
        seconds_or_default(
            "renewal_buffer_secs",
            self.renewal_buffer_secs,
            DEFAULT_RENEWAL_BUFFER_SECS,
        )
    }

    pub fn default_token_ttl(&self) -> chrono::Duration {
        seconds_or_default(
            "default_token_ttl_secs",
            self.default_token_ttl_secs,
            DEFAULT_TOKEN_TTL_SECS,
        )
    }
}

/// `secs` as a duration, or `fallback` when it is negative or out of range
fn seconds_or_default(field: &str, secs: i64, fallback: i64) -> chrono::Duration {
    match chrono::Duration::try_seconds(secs) {
        Some(duration) if secs >= 0 => duration,
        _ => {
            warn!(field, value = secs, fallback, "Out-of-range duration in config, using default");
            chrono::Duration::seconds(fallback)
        }
    }
}

fn override_parsed<T, F>(field: &mut T, name: &str, lookup: &F)
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *field = value,
        Err(e) => warn!(var = name, value = %raw, error = %e, "Ignoring invalid environment override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.renewal_buffer_secs, 300);
        assert_eq!(config.default_token_ttl_secs, 3600);
        assert_eq!(config.storage, StorageKind::Keyring);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"api_base_url":"https://api.example.com","storage":"file"}"#)
            .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.storage, StorageKind::File);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            backend: BackendKind::Demo,
            last_email: Some("a@b.com".to_string()),
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            (ENV_API_URL, "https://staging.example.com"),
            (ENV_TIMEOUT_SECS, "5"),
            (ENV_RENEWAL_BUFFER_SECS, "60"),
            (ENV_STORAGE, "FILE"),
            (ENV_BACKEND, "demo"),
        ]));

        assert_eq!(config.api_base_url, "https://staging.example.com");
        assert_eq!(config.request_timeout(), std::time::Duration::from_secs(5));
        assert_eq!(config.renewal_buffer(), chrono::Duration::seconds(60));
        assert_eq!(config.storage, StorageKind::File);
        assert_eq!(config.backend, BackendKind::Demo);
    }

    #[test]
    fn test_out_of_range_durations_fall_back_to_defaults() {
        let mut config = Config::default();
        config.apply_env(env(&[(ENV_RENEWAL_BUFFER_SECS, i64::MAX.to_string().as_str())]));
        assert_eq!(config.renewal_buffer_secs, i64::MAX);
        assert_eq!(config.renewal_buffer(), chrono::Duration::seconds(300));

        let config = Config {
            default_token_ttl_secs: -5,
            ..Config::default()
        };
        assert_eq!(config.default_token_ttl(), chrono::Duration::seconds(3600));
    }

    #[test]
    fn test_invalid_env_override_is_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[(ENV_TIMEOUT_SECS, "soon"), (ENV_STORAGE, "cloud")]));
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.storage, StorageKind::Keyring);
    }
}
