//! Daemon configuration.
//!
//! Loaded once at startup from `deskbot.toml` (path overridable via
//! `DESKBOT_CONFIG`) with environment-variable overrides for secrets, then
//! passed around as an immutable value. Request handlers never read the
//! environment directly.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Address the HTTP API binds to.
    pub bind_address: String,
    /// Path to the SQLite database file.
    pub database_path: PathBuf,
    /// Deployment environment tag. Anything other than "production" exposes
    /// internal error detail in API responses.
    pub environment: String,
    /// Allowed CORS origins. Empty means permissive (any origin).
    pub allowed_origins: Vec<String>,
    pub model: ModelConfig,
    pub outbox: OutboxConfig,
}

/// Completion model settings (OpenAI-compatible chat endpoint).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ModelConfig {
    /// Base URL of the completion API. `None` disables generated answers.
    pub endpoint: Option<String>,
    /// API key; also read from `DESKBOT_MODEL_API_KEY`.
    pub api_key: Option<String>,
    pub model: String,
    pub request_timeout_secs: u64,
}

/// Outbox dispatcher tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct OutboxConfig {
    /// Seconds between dispatcher passes over pending entries.
    pub poll_interval_secs: u64,
    /// Delivery attempts before an entry is marked failed.
    pub max_attempts: i64,
    /// Maximum entries claimed per pass.
    pub batch_size: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8321".into(),
            database_path: PathBuf::from("deskbot.db"),
            environment: "development".into(),
            allowed_origins: Vec::new(),
            model: ModelConfig::default(),
            outbox: OutboxConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: "gpt-4o-mini".into(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            max_attempts: 5,
            batch_size: 25,
        }
    }
}

impl Config {
    /// Load configuration from the given path, falling back to defaults when
    /// the file does not exist. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => std::env::var("DESKBOT_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("deskbot.toml")),
        };

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            toml::from_str(&raw)?
        } else {
            Self::default()
        };

        if let Ok(key) = std::env::var("DESKBOT_MODEL_API_KEY") {
            config.model.api_key = Some(key);
        }
        if let Ok(endpoint) = std::env::var("DESKBOT_MODEL_ENDPOINT") {
            config.model.endpoint = Some(endpoint);
        }
        if let Ok(address) = std::env::var("DESKBOT_BIND_ADDRESS") {
            config.bind_address = address;
        }

        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_permissive_and_unconfigured() {
        let config = Config::default();

        assert!(config.allowed_origins.is_empty());
        assert!(config.model.endpoint.is_none());
        assert!(!config.is_production());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            environment = "production"
            allowed_origins = ["https://app.example.com"]

            [outbox]
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert!(config.is_production());
        assert_eq!(config.allowed_origins.len(), 1);
        assert_eq!(config.outbox.max_attempts, 3);
        // Untouched sections keep their defaults.
        assert_eq!(config.outbox.poll_interval_secs, 15);
        assert_eq!(config.bind_address, "127.0.0.1:8321");
    }
}
