//! Graph app-only authentication
//!
//! Implements the OAuth2 client credentials grant against the Microsoft
//! identity platform. Tokens are cached in memory and refreshed shortly
//! before they expire. Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::Context;
use serde::Deserialize;
use std::sync::Mutex;

use crate::config::GraphSettings;
use crate::error::{Result, SyncError};

/// Seconds before expiry at which a cached token is considered stale
const REFRESH_MARGIN_SECS: i64 = 300;

/// Token response from the identity platform
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    #[allow(dead_code)]
    token_type: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

/// Client credentials and token cache for Graph
pub struct GraphAuth {
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    agent: ureq::Agent,
    cached: Mutex<Option<CachedToken>>,
}

impl GraphAuth {
    /// Create a new GraphAuth from the Graph settings
    pub fn new(settings: &GraphSettings, agent: ureq::Agent) -> Self {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            settings.authority.trim_end_matches('/'),
            settings.tenant_id
        );

        Self {
            token_url,
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            scope: settings.scope.clone(),
            agent,
            cached: Mutex::new(None),
        }
    }

    /// Get a valid access token, requesting a new one when needed
    pub fn get_access_token(&self) -> Result<String> {
        let now = chrono::Utc::now().timestamp();

        let mut cached = self
            .cached
            .lock()
            .map_err(|_| SyncError::source_fetch("token cache lock poisoned"))?;

        if let Some(token) = cached.as_ref()
            && token.expires_at > now + REFRESH_MARGIN_SECS
        {
            return Ok(token.access_token.clone());
        }

        let response = self.request_token()?;
        let token = CachedToken {
            access_token: response.access_token,
            expires_at: now + response.expires_in.unwrap_or(3600),
        };
        let access_token = token.access_token.clone();
        *cached = Some(token);

        log::debug!("Acquired Graph access token");
        Ok(access_token)
    }

    /// Drop the cached token so the next call authenticates again
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
    }

    fn request_token(&self) -> Result<TokenResponse> {
        let response = self.agent.post(&self.token_url).send_form([
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
            ("grant_type", "client_credentials"),
        ]);

        match response {
            Ok(mut resp) => {
                let token: TokenResponse = resp
                    .body_mut()
                    .read_json()
                    .context("Failed to parse token response")
                    .map_err(SyncError::source_fetch)?;
                Ok(token)
            }
            Err(ureq::Error::StatusCode(status @ (400 | 401 | 403))) => Err(SyncError::SourceAuth {
                message: format!("token request rejected with HTTP {}", status),
            }),
            Err(e) => Err(SyncError::source_fetch(format!("Failed to request token: {}", e))),
        }
    }
}
