use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::notification::DEFAULT_INITIAL_DELAY_MS;

pub const CONFIG_PATH_ENV: &str = "CTXBUS_CONFIG";
pub const SOA_URL_ENV: &str = "CTXBUS_SOA_URL";
pub const SOA_TIMEOUT_ENV: &str = "CTXBUS_SOA_TIMEOUT_MS";
pub const LOG_FILTER_ENV: &str = "CTXBUS_LOG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {name}: {message}")]
    Invalid { name: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoaConfig {
    #[serde(default = "default_soa_base_url")]
    pub base_url: String,
    #[serde(default = "default_soa_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SoaConfig {
    fn default() -> Self {
        Self {
            base_url: default_soa_base_url(),
            timeout_ms: default_soa_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub soa: SoaConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    /// Preference values that win over whatever the server returns.
    #[serde(default)]
    pub preferences: HashMap<String, String>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_selection_debounce_ms")]
    pub selection_debounce_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            soa: SoaConfig::default(),
            notification: NotificationConfig::default(),
            preferences: HashMap::new(),
            log_filter: default_log_filter(),
            selection_debounce_ms: default_selection_debounce_ms(),
        }
    }
}

impl AppConfig {
    /// `.env`, then the JSON file named by `CTXBUS_CONFIG`, then `CTXBUS_*`
    /// overrides from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply `CTXBUS_*` overrides; `lookup` is `std::env::var` outside tests.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(SOA_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.soa.base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(SOA_TIMEOUT_ENV) {
            self.soa.timeout_ms = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name: SOA_TIMEOUT_ENV.to_string(),
                message: format!("expected milliseconds, got {raw:?}"),
            })?;
        }
        if let Some(filter) = lookup(LOG_FILTER_ENV).filter(|v| !v.trim().is_empty()) {
            self.log_filter = filter.trim().to_string();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.soa.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: "soa.base_url".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.soa.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "soa.timeout_ms".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

fn default_soa_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_soa_timeout_ms() -> u64 {
    30_000
}

fn default_initial_delay_ms() -> u64 {
    DEFAULT_INITIAL_DELAY_MS
}

fn default_log_filter() -> String {
    "ctxbus=debug,info".to_string()
}

fn default_selection_debounce_ms() -> u64 {
    100
}
