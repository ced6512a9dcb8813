//! HTTP client for the player endpoints

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::auth::TokenProvider;
use super::models::{parse_currently_playing, parse_recently_played};
use super::{NowPlaying, PlaybackApi};
use crate::config::SpotifySettings;
use crate::errors::{HistoryError, HistoryResult};
use crate::models::PlayEvent;

/// Seconds from a `Retry-After` header, if present and numeric
pub(super) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a non-success status onto the error taxonomy
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, default_retry: Duration) -> HistoryResult<()> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(HistoryError::RateLimited {
            retry_after: retry_after.unwrap_or(default_retry),
        }),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(HistoryError::Unauthorized(format!("provider answered {}", status)))
        }
        s => Err(HistoryError::Transient(format!("provider answered {}", s))),
    }
}

/// Spotify Web API client for the current user's playback
pub struct SpotifyClient {
    http: Client,
    api_base: String,
    tokens: TokenProvider,
    default_retry_after: Duration,
}

impl SpotifyClient {
    pub fn new(settings: &SpotifySettings, default_retry_after: Duration) -> HistoryResult<Self> {
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(concat!("playlog/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            tokens: TokenProvider::new(http.clone(), settings),
            http,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            default_retry_after,
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> HistoryResult<Response> {
        let token = self.tokens.access_token().await?;
        let url = format!("{}{}", self.api_base, path);

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if let Err(e) = classify_status(status, retry_after(response.headers()), self.default_retry_after) {
            if matches!(e, HistoryError::Unauthorized(_)) {
                self.tokens.invalidate().await;
            }
            warn!(path, %status, "Request failed");
            return Err(e);
        }
        Ok(response)
    }

    /// Decode a body, treating an empty one as absent
    async fn json_body(response: Response) -> HistoryResult<Option<Value>> {
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

#[async_trait]
impl PlaybackApi for SpotifyClient {
    async fn recently_played(&self, limit: u32) -> HistoryResult<Vec<PlayEvent>> {
        let limit = limit.clamp(1, 50);
        let response = self
            .get("/me/player/recently-played", &[("limit", limit.to_string())])
            .await?;

        match Self::json_body(response).await? {
            Some(body) => {
                let events = parse_recently_played(&body)?;
                debug!(count = events.len(), "Fetched recently played");
                Ok(events)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn currently_playing(&self) -> HistoryResult<Option<NowPlaying>> {
        let response = self.get("/me/player/currently-playing", &[]).await?;
        match Self::json_body(response).await? {
            Some(body) => parse_currently_playing(&body),
            None => Ok(None),
        }
    }

    async fn invalidate_token(&self) {
        self.tokens.invalidate().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    const DEFAULT: Duration = Duration::from_secs(30);

    #[test]
    fn test_classify_success() {
        assert!(classify_status(StatusCode::OK, None, DEFAULT).is_ok());
        assert!(classify_status(StatusCode::NO_CONTENT, None, DEFAULT).is_ok());
    }

    #[test]
    fn test_classify_rate_limit() {
        match classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(7)), DEFAULT) {
            Err(HistoryError::RateLimited { retry_after }) => assert_eq!(retry_after, Duration::from_secs(7)),
            other => panic!("unexpected {:?}", other),
        }
        match classify_status(StatusCode::TOO_MANY_REQUESTS, None, DEFAULT) {
            Err(HistoryError::RateLimited { retry_after }) => assert_eq!(retry_after, DEFAULT),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_auth_and_server_errors() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, DEFAULT),
            Err(HistoryError::Unauthorized(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, None, DEFAULT),
            Err(HistoryError::Unauthorized(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None, DEFAULT),
            Err(HistoryError::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, None, DEFAULT),
            Err(HistoryError::Transient(_))
        ));
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(12)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn test_client_trims_api_base() {
        let settings = SpotifySettings {
            api_base: "http://localhost:9/v1/".to_string(),
            ..SpotifySettings::default()
        };
        let client = SpotifyClient::new(&settings, DEFAULT).unwrap();
        assert_eq!(client.api_base, "http://localhost:9/v1");
    }
}
