//! Access tokens from the refresh-token grant

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::SpotifySettings;
use crate::errors::{HistoryError, HistoryResult};

/// Refresh this long before the provider says the token expires
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
    /// Present when the provider rotates the refresh token
    #[serde(default)]
    refresh_token: Option<String>,
}

fn default_expires_in() -> u64 {
    3600
}

/// A cached access token
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: String,
    pub refresh_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.refresh_at
    }
}

#[derive(Debug)]
struct TokenState {
    refresh_token: String,
    cached: Option<AccessToken>,
}

/// Hands out access tokens, refreshing them when they are about to expire
#[derive(Debug)]
pub struct TokenProvider {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    state: Mutex<TokenState>,
}

impl TokenProvider {
    pub fn new(client: Client, settings: &SpotifySettings) -> Self {
        Self {
            client,
            token_url: settings.token_url.clone(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            state: Mutex::new(TokenState {
                refresh_token: settings.refresh_token.clone(),
                cached: None,
            }),
        }
    }

    /// A valid access token, refreshed if needed
    pub async fn access_token(&self) -> HistoryResult<String> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let response = self.refresh(&state.refresh_token).await?;
        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(EXPIRY_MARGIN);

        if let Some(rotated) = response.refresh_token.filter(|t| !t.is_empty()) {
            if rotated != state.refresh_token {
                info!("Refresh token was rotated by the provider");
                state.refresh_token = rotated;
            }
        }

        let token = AccessToken {
            value: response.access_token,
            refresh_at: Instant::now() + lifetime,
        };
        debug!(valid_for = ?lifetime, "Obtained access token");
        let value = token.value.clone();
        state.cached = Some(token);
        Ok(value)
    }

    /// Drop the cached access token so the next call refreshes
    pub async fn invalidate(&self) {
        self.state.lock().await.cached = None;
    }

    async fn refresh(&self, refresh_token: &str) -> HistoryResult<TokenResponse> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await?;

        let status = response.status();
        match status {
            s if s.is_success() => Ok(response.json::<TokenResponse>().await?),
            // invalid_grant and invalid_client both come back as 400
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                Err(HistoryError::Unauthorized(format!("token refresh rejected ({}): {}", status, body)))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(HistoryError::RateLimited {
                retry_after: super::client::retry_after(response.headers()).unwrap_or(Duration::from_secs(30)),
            }),
            _ => Err(HistoryError::Transient(format!("token refresh failed with {}", status))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_defaults() {
        let parsed: TokenResponse = serde_json::from_str(r#"{"access_token":"abc"}"#).unwrap();
        assert_eq!(parsed.access_token, "abc");
        assert_eq!(parsed.expires_in, 3600);
        assert_eq!(parsed.refresh_token, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_freshness() {
        let token = AccessToken {
            value: "abc".to_string(),
            refresh_at: Instant::now() + Duration::from_secs(10),
        };
        assert!(token.is_fresh());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!token.is_fresh());
    }

    #[tokio::test]
    async fn test_invalidate_clears_cache() {
        let provider = TokenProvider::new(Client::new(), &SpotifySettings::default());
        provider.state.lock().await.cached = Some(AccessToken {
            value: "cached".to_string(),
            refresh_at: Instant::now() + Duration::from_secs(600),
        });
        assert_eq!(provider.access_token().await.unwrap(), "cached");

        provider.invalidate().await;
        assert!(provider.state.lock().await.cached.is_none());
    }
}
