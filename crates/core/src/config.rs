//! Configuration management for Veritas.

use serde::{Deserialize, Serialize};
#[cfg(feature = "toml")]
use std::path::Path;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SdkConfig {
    /// Appended to every fully-qualified username, e.g. `.test.id`.
    pub username_suffix: String,
    /// Account type tag placed between the name and the suffix.
    pub account_type: String,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    pub url: String,
    pub login_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl SdkConfig {
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            username_suffix: ".test.id".to_string(),
            account_type: "person".to_string(),
            relay: RelayConfig {
                url: "ws://localhost:5000".to_string(),
                login_timeout_ms: 5_000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.account_type.is_empty() {
            return Err(CoreError::Config("account_type must not be empty".into()));
        }
        if !self.username_suffix.is_empty() && !self.username_suffix.starts_with('.') {
            return Err(CoreError::Config(format!(
                "username_suffix must start with '.': {}",
                self.username_suffix
            )));
        }
        if self.relay.login_timeout_ms == 0 {
            return Err(CoreError::Config(
                "relay.login_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self::default_config()
    }
}
