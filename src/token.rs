//! OAuth application token lifecycle.
//!
//! A [`TokenManager`] caches a single client-credentials token and fetches a new
//! one once the cached token is [`TOKEN_TTL_SECS`] old. The check and the
//! refresh run under one lock, so callers racing on an expired token trigger a
//! single refresh.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tokio::sync::Mutex;

use crate::config::Credentials;
use crate::error::{Error, Result};

pub const URL_SANDBOX: &str = "https://api.sandbox.ebay.com/identity/v1/oauth2/token";
pub const URL_PRODUCTION: &str = "https://api.ebay.com/identity/v1/oauth2/token";

/// Lifetime of a fetched token.
pub const TOKEN_TTL_SECS: i64 = 60 * 60;

const TOKEN_REQUEST_BODY: &str =
    "grant_type=client_credentials&scope=https%3A%2F%2Fapi.ebay.com%2Foauth%2Fapi_scope";

/// Source of wall-clock time for expiry checks.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A fetched bearer token and the time it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub issued_at: DateTime<Utc>,
}

impl Token {
    /// True while less than [`TOKEN_TTL_SECS`] have elapsed since `issued_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now - self.issued_at < Duration::seconds(TOKEN_TTL_SECS)
    }
}

pub struct TokenManager {
    credentials: Credentials,
    client: Client,
    token_url: String,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<Token>>,
}

impl TokenManager {
    /// Manager that fetches tokens from `token_url` using the system clock.
    pub fn new(credentials: Credentials, client: Client, token_url: impl Into<String>) -> Self {
        Self::with_clock(credentials, client, token_url, Arc::new(SystemClock))
    }

    pub fn with_clock(
        credentials: Credentials,
        client: Client,
        token_url: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials,
            client,
            token_url: token_url.into(),
            clock,
            current: Mutex::new(None),
        }
    }

    /// Returns a valid token, fetching a new one if none is cached or it expired.
    #[tracing::instrument(skip(self))]
    pub async fn get_token(&self) -> Result<String> {
        let mut current = self.current.lock().await;

        if let Some(token) = current.as_ref() {
            if token.is_valid_at(self.clock.now()) {
                return Ok(token.value.clone());
            }
            debug!("Cached token issued at {} has expired", token.issued_at);
        }

        info!("Getting api token from ebay ....");
        let value = self.send_request().await?;
        *current = Some(Token {
            value: value.clone(),
            issued_at: self.clock.now(),
        });
        info!("...token retrieved!");

        Ok(value)
    }

    /// True if no token is cached or the cached one reached its TTL.
    pub async fn is_expired(&self) -> bool {
        match self.current.lock().await.as_ref() {
            Some(token) => !token.is_valid_at(self.clock.now()),
            None => true,
        }
    }

    /// Snapshot of the cached token, if any.
    pub async fn current(&self) -> Option<Token> {
        self.current.lock().await.clone()
    }

    /// Performs the client-credentials grant and returns the access token.
    async fn send_request(&self) -> Result<String> {
        let credentials = format!(
            "{}:{}",
            self.credentials.client_id, self.credentials.client_secret
        );
        let encoded = BASE64.encode(credentials.as_bytes());

        debug!("POST {}", self.token_url);

        let response = self
            .client
            .post(&self.token_url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(AUTHORIZATION, format!("Basic {}", encoded))
            .body(TOKEN_REQUEST_BODY)
            .send()
            .await
            .map_err(|e| Error::Credential(format!("token request failed: {}", e)))?;

        let response = response
            .error_for_status()
            .map_err(|e| Error::Credential(format!("token request rejected: {}", e)))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Credential(format!("token response is not valid JSON: {}", e)))?;

        body.get("access_token")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Credential("token response has no access_token field".to_string())
            })
    }
}
