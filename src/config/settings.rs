//! Application settings
//!
//! Loaded from an optional TOML file, then overlaid with `PLAYLOG_*`
//! environment variables (`PLAYLOG_POLLER__RECENT_INTERVAL_SECS=60`).

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub spotify: SpotifySettings,
    pub poller: PollerSettings,
    pub feed: FeedSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origin; any origin when unset
    pub allowed_origin: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            allowed_origin: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("spotify_history.db"),
            busy_timeout_ms: 2000,
            max_connections: 5,
            acquire_timeout_secs: 5,
        }
    }
}

impl DatabaseSettings {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifySettings {
    pub client_id: String,
    pub client_secret: String,
    /// Registered redirect target; only needed by whatever issued the refresh token
    pub redirect_uri: String,
    pub refresh_token: String,
    pub api_base: String,
    pub token_url: String,
    pub request_timeout_secs: u64,
}

impl Default for SpotifySettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            refresh_token: String::new(),
            api_base: "https://api.spotify.com/v1".to_string(),
            token_url: "https://accounts.spotify.com/api/token".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl SpotifySettings {
    /// Fill blanks from the variable names the old scripts read out of `.env`
    pub fn apply_env_fallbacks(&mut self) {
        fill_from_env(&mut self.client_id, "CLIENT_ID");
        fill_from_env(&mut self.client_secret, "CLIENT_SECRET");
        fill_from_env(&mut self.redirect_uri, "REDIRECT_URL");
        fill_from_env(&mut self.refresh_token, "SPOTIFY_REFRESH_TOKEN");
    }

    /// Whether enough is configured to talk to the API
    pub fn has_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty() && !self.refresh_token.is_empty()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn fill_from_env(slot: &mut String, key: &str) {
    if slot.trim().is_empty() {
        if let Ok(value) = std::env::var(key) {
            *slot = value.trim().to_string();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSettings {
    pub recent_enabled: bool,
    pub recent_interval_secs: u64,
    pub recent_limit: u32,

    pub now_playing_enabled: bool,
    pub now_playing_interval_ms: u64,
    pub idle_interval_secs: u64,
    pub idle_slow_interval_secs: u64,
    pub idle_slow_after_secs: u64,
    /// Suppress a now-playing insert if the same track was stored this close to it
    pub now_playing_window_secs: u64,

    pub backoff_base_ms: u64,
    pub backoff_max_secs: u64,
    /// Used when a 429 arrives without a usable Retry-After header
    pub default_retry_after_secs: u64,
    pub store_retry_secs: u64,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            recent_enabled: true,
            recent_interval_secs: 30,
            recent_limit: 50,
            now_playing_enabled: false,
            now_playing_interval_ms: 1000,
            idle_interval_secs: 10,
            idle_slow_interval_secs: 30,
            idle_slow_after_secs: 300,
            now_playing_window_secs: 300,
            backoff_base_ms: 1000,
            backoff_max_secs: 60,
            default_retry_after_secs: 30,
            store_retry_secs: 5,
        }
    }
}

impl PollerSettings {
    pub fn recent_interval(&self) -> Duration {
        Duration::from_secs(self.recent_interval_secs)
    }

    pub fn now_playing_interval(&self) -> Duration {
        Duration::from_millis(self.now_playing_interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    pub fn idle_slow_interval(&self) -> Duration {
        Duration::from_secs(self.idle_slow_interval_secs)
    }

    pub fn idle_slow_after(&self) -> Duration {
        Duration::from_secs(self.idle_slow_after_secs)
    }

    pub fn now_playing_window(&self) -> Duration {
        Duration::from_secs(self.now_playing_window_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }

    pub fn store_retry(&self) -> Duration {
        Duration::from_secs(self.store_retry_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub interval_ms: u64,
    pub page_size: u32,
    pub error_retry_ms: u64,
    pub queue_capacity: usize,
    pub heartbeat_secs: u64,
    /// Reconnect delay advertised to SSE clients
    pub client_retry_ms: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            page_size: 200,
            error_retry_ms: 1000,
            queue_capacity: 256,
            heartbeat_secs: 15,
            client_retry_ms: 3000,
        }
    }
}

impl FeedSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn error_retry(&self) -> Duration {
        Duration::from_millis(self.error_retry_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub format: LogFormat,
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Compact,
            filter: "info,sqlx=warn".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `path` (if any) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("PLAYLOG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut settings: Settings = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        settings.spotify.apply_env_fallbacks();
        Ok(settings)
    }

    /// Parse settings from a TOML string, without touching the environment
    #[cfg(test)]
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;
        Ok(settings)
    }
}
