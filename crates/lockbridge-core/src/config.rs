//! Bridge configuration.
//!
//! The bridge consumes a validated [`BridgeConfig`]. Parsing happens from a
//! JSON document using camelCase keys:
//!
//! ```
//! use lockbridge_core::config::BridgeConfig;
//! use std::time::Duration;
//!
//! let config = BridgeConfig::from_json_str(r##"{
//!     "credentials": {
//!         "clientId": "id",
//!         "clientSecret": "secret",
//!         "username": "user@example.com",
//!         "password": "hunter2"
//!     },
//!     "pollingIntervalSecs": 30,
//!     "color": "#FFAA00"
//! }"##).unwrap();
//!
//! assert_eq!(config.polling_interval(), Duration::from_secs(30));
//! ```

use crate::constants::{
    DEFAULT_API_BASE_URL, DEFAULT_DISCOVERY_INTERVAL_SECS, DEFAULT_OFFLINE_INTERVAL_SECS,
    DEFAULT_POLLING_INTERVAL_SECS, DEFAULT_REQUEST_TIMEOUT_SECS, MIN_POLLING_INTERVAL_SECS,
};
use crate::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Cloud account credentials.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Validated bridge configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    pub credentials: Credentials,

    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,

    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_secs: u64,

    #[serde(default = "default_offline_interval")]
    pub offline_interval_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Accent colour for the accessory, `#RRGGBB`.
    #[serde(default)]
    pub color: Option<String>,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL_SECS
}

fn default_discovery_interval() -> u64 {
    DEFAULT_DISCOVERY_INTERVAL_SECS
}

fn default_offline_interval() -> u64 {
    DEFAULT_OFFLINE_INTERVAL_SECS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

impl BridgeConfig {
    /// Build a configuration with default intervals.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            polling_interval_secs: DEFAULT_POLLING_INTERVAL_SECS,
            discovery_interval_secs: DEFAULT_DISCOVERY_INTERVAL_SECS,
            offline_interval_secs: DEFAULT_OFFLINE_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            color: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: BridgeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check credentials, interval ordering and colour format.
    ///
    /// # Errors
    /// Returns `Error::Config` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        let creds = &self.credentials;
        for (name, value) in [
            ("clientId", &creds.client_id),
            ("clientSecret", &creds.client_secret),
            ("username", &creds.username),
            ("password", &creds.password),
        ] {
            if value.trim().is_empty() {
                return Err(Error::config(format!("credentials.{name} must not be empty")));
            }
        }

        if self.polling_interval_secs < MIN_POLLING_INTERVAL_SECS {
            return Err(Error::config(format!(
                "pollingIntervalSecs must be at least {MIN_POLLING_INTERVAL_SECS}, got {}",
                self.polling_interval_secs
            )));
        }
        if self.discovery_interval_secs < self.polling_interval_secs {
            return Err(Error::config(
                "discoveryIntervalSecs must not be shorter than pollingIntervalSecs",
            ));
        }
        if self.offline_interval_secs < self.discovery_interval_secs {
            return Err(Error::config(
                "offlineIntervalSecs must not be shorter than discoveryIntervalSecs",
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::config("requestTimeoutSecs must be positive"));
        }

        if let Some(color) = &self.color
            && !is_hex_color(color)
        {
            return Err(Error::config(format!(
                "color must be in #RRGGBB format, got {color}"
            )));
        }

        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(Error::config("apiBaseUrl must be an http(s) URL"));
        }

        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn offline_interval(&self) -> Duration {
        Duration::from_secs(self.offline_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn is_hex_color(value: &str) -> bool {
    value
        .strip_prefix('#')
        .is_some_and(|hex| hex.len() == 6 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
}
