use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error_handling::types::ConfigError;

/// Application configuration, loaded from a TOML file given on the command
/// line.
///
/// # Fields Overview
///
/// - `bind_address` / `port`: where the HTTP API listens
/// - `database_path`: SQLite file, created on first start
/// - `google_client_id`: expected `aud` claim of Google identity tokens;
///   empty disables Google login
/// - `tokens`: bearer token secret and lifetimes
/// - `inference`: the local language-model server the chat domain proxies to
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "defaults::bind_address")]
    pub bind_address: String,

    #[serde(default = "defaults::port")]
    pub port: u16,

    #[serde(default = "defaults::database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub google_client_id: String,

    pub tokens: TokenConfig,

    #[serde(default)]
    pub inference: InferenceConfig,
}

/// Bearer token settings. The secret signs every issued token, so changing it
/// invalidates all of them at once.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub secret: String,

    /// Access token lifetime in seconds
    #[serde(default = "defaults::access_ttl_secs")]
    pub access_ttl_secs: u64,

    /// Refresh token lifetime in seconds
    #[serde(default = "defaults::refresh_ttl_secs")]
    pub refresh_ttl_secs: u64,
}

/// Settings for the outbound inference server (an Ollama-compatible HTTP API).
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "defaults::inference_base_url")]
    pub base_url: String,

    #[serde(default = "defaults::inference_model")]
    pub model: String,

    /// Per-request timeout in seconds. The call blocks the handler for at
    /// most this long; there is no retry.
    #[serde(default = "defaults::inference_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::inference_base_url(),
            model: defaults::inference_model(),
            timeout_secs: defaults::inference_timeout_secs(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn bind_address() -> String {
        "0.0.0.0".to_string()
    }

    pub fn port() -> u16 {
        8000
    }

    pub fn database_path() -> PathBuf {
        PathBuf::from("storypals.sqlite3")
    }

    pub fn access_ttl_secs() -> u64 {
        3600
    }

    pub fn refresh_ttl_secs() -> u64 {
        7 * 24 * 3600
    }

    pub fn inference_base_url() -> String {
        "http://localhost:11434".to_string()
    }

    pub fn inference_model() -> String {
        "gemma:2b".to_string()
    }

    pub fn inference_timeout_secs() -> u64 {
        30
    }
}

impl Config {
    /// Load and validate a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&raw).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.parse::<IpAddr>().is_err() {
            return Err(ConfigError::BadAddress(format!(
                "'{}' is not a valid IP address",
                self.bind_address
            )));
        }
        if self.tokens.secret.is_empty() {
            return Err(ConfigError::MissingSecret(
                "tokens.secret must not be empty".to_string(),
            ));
        }
        if self.tokens.access_ttl_secs == 0 || self.tokens.refresh_ttl_secs == 0 {
            return Err(ConfigError::NotInRange(
                "token lifetimes must be positive".to_string(),
            ));
        }
        if self.inference.timeout_secs == 0 {
            return Err(ConfigError::NotInRange(
                "inference.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
