//! API key authentication for the MCP endpoint.

use axum::http::{header, HeaderMap};

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// API key for `X-API-Key` or bearer token auth
    pub api_key: Option<String>,
    /// Whether authentication is enabled
    pub enabled: bool,
}

impl AuthConfig {
    /// Authentication is enabled when a non-empty key is configured.
    pub fn new(api_key: Option<String>) -> Self {
        let api_key = api_key.filter(|k| !k.is_empty());
        Self {
            enabled: api_key.is_some(),
            api_key,
        }
    }

    /// Verify API key
    pub fn verify_api_key(&self, key: &str) -> bool {
        self.api_key.as_deref().is_some_and(|k| k == key)
    }

    /// Check the request headers for a valid key.
    ///
    /// Accepts `X-API-Key` (preferred for MCP clients) or
    /// `Authorization: Bearer <key>`. Always true when auth is disabled.
    pub fn authorize(&self, headers: &HeaderMap) -> bool {
        if !self.enabled {
            return true;
        }

        let api_key_header = headers.get("x-api-key").and_then(|v| v.to_str().ok());
        if api_key_header.is_some_and(|key| self.verify_api_key(key)) {
            return true;
        }

        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| self.verify_api_key(token))
    }
}
