//! Spotify Web API access

mod auth;
mod client;
pub mod models;

use async_trait::async_trait;

use crate::errors::HistoryResult;
use crate::models::PlayEvent;

pub use client::SpotifyClient;

/// The currently playing item, already converted into a play event
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub is_playing: bool,
    pub progress_ms: Option<i64>,
    pub event: PlayEvent,
}

/// What the pollers need from the playback provider
#[async_trait]
pub trait PlaybackApi: Send + Sync {
    /// Up to `limit` recently played tracks, in whatever order the provider returns them
    async fn recently_played(&self, limit: u32) -> HistoryResult<Vec<PlayEvent>>;

    /// The current item, `None` when nothing (or no track) is playing
    async fn currently_playing(&self) -> HistoryResult<Option<NowPlaying>>;

    /// Forget any cached credentials after the provider rejected them
    async fn invalidate_token(&self) {}
}
