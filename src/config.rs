//! Connection configuration and API credentials.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::token::URL_PRODUCTION;

fn default_true() -> bool {
    true
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_proxy_port() -> u16 {
    80
}

fn default_token_url() -> String {
    URL_PRODUCTION.to_string()
}

/// Settings consumed by a [`Connection`](crate::Connection).
///
/// Every field has a default, so a JSON file only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Use `https` (true) or `http` (false) when building the call URL.
    #[serde(default = "default_true")]
    pub https: bool,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub uri: String,
    /// Raise aggregated errors (true) or only attach them to the response (false).
    #[serde(default = "default_true")]
    pub errors: bool,
    #[serde(default)]
    pub doc_url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub proxy_host: Option<String>,
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,
    /// Escape text nodes when rendering an XML body from a JSON payload.
    #[serde(default)]
    pub escape_xml: bool,
    /// OAuth endpoint used by the token manager.
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            https: true,
            domain: String::new(),
            uri: String::new(),
            errors: true,
            doc_url: String::new(),
            method: default_method(),
            timeout_secs: default_timeout_secs(),
            proxy_host: None,
            proxy_port: default_proxy_port(),
            escape_xml: false,
            token_url: default_token_url(),
        }
    }
}

impl ConnectionConfig {
    /// Configuration for an endpoint with every other field defaulted.
    pub fn new(domain: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading connection config from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::Configuration(format!("invalid config {}: {}", path.display(), e))
        })
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Proxy URL applied to both schemes, if a proxy host is configured.
    pub fn proxy_url(&self) -> Option<String> {
        self.proxy_host
            .as_ref()
            .map(|host| format!("http://{}:{}", host, self.proxy_port))
    }

    /// URL scheme selected by `https`.
    pub fn scheme(&self) -> &'static str {
        if self.https { "https" } else { "http" }
    }
}

/// OAuth application keys.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    /// Credentials as given; checked when a connection is created.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Builds credentials from optional parts, rejecting missing or empty values.
    pub fn from_parts(client_id: Option<&str>, client_secret: Option<&str>) -> Result<Self> {
        match (client_id, client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Ok(Self::new(id, secret))
            }
            _ => Err(Error::Configuration(
                "<client_id> and <client_secret> must be provided for API access".to_string(),
            )),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        Self::from_parts(Some(&self.client_id), Some(&self.client_secret)).map(|_| ())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"*********")
            .finish()
    }
}
