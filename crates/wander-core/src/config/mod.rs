//! Remote endpoint configuration for client shells.
//!
//! The shells (mobile, desktop) provision a backend base URL and a public
//! API key at build or bootstrap time; everything else in the core derives
//! its endpoints from this pair.

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

/// HTTP connect/read timeout applied per attempt, in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Backend connection settings.
///
/// `api_key` is the static public key sent with every request; it is not a
/// secret credential and must never be confused with the session tokens
/// owned by the token manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    base_url: String,
    api_key: String,
}

impl RemoteConfig {
    /// Validate and normalize a base URL + API key pair.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let base_url = normalize_text_option(Some(base_url.into()))
            .ok_or_else(|| Error::InvalidInput("Backend URL must not be empty".to_string()))?;
        if !is_http_url(&base_url) {
            return Err(Error::InvalidInput(
                "Backend URL must include http:// or https://".to_string(),
            ));
        }

        let api_key = normalize_text_option(Some(api_key.into()))
            .ok_or_else(|| Error::InvalidInput("API key must not be empty".to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Base URL for the PostgREST data API.
    pub fn data_url(&self) -> String {
        format!("{}/rest/v1", self.base_url)
    }

    /// Base URL for the auth API.
    pub fn auth_url(&self) -> String {
        format!("{}/auth/v1", self.base_url)
    }

    /// The static public API key header value.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}
