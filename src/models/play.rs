//! Play events and the records read back from the store

use serde::{Deserialize, Serialize};

/// Where a play came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaySource {
    Recent,
    NowPlaying,
    Legacy,
}

impl PlaySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaySource::Recent => "recent",
            PlaySource::NowPlaying => "now_playing",
            PlaySource::Legacy => "legacy",
        }
    }
}

/// An artist credit on a track, in billing order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistCredit {
    pub id: String,
    pub name: String,
}

impl ArtistCredit {
    /// Build a credit, deriving a stable id from the name when the provider gave none
    pub fn new(id: Option<String>, name: String) -> Self {
        let id = match id {
            Some(id) if !id.trim().is_empty() => id,
            _ => format!("name:{}", name.trim().to_lowercase()),
        };
        Self { id, name }
    }
}

/// One playback event on its way into the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayEvent {
    pub track_id: String,
    pub track_name: Option<String>,
    pub artists: Vec<ArtistCredit>,
    pub album_id: Option<String>,
    pub album_name: Option<String>,
    pub album_release_date: Option<String>,
    pub album_type: Option<String>,
    pub duration_ms: Option<i64>,
    /// Epoch milliseconds, UTC
    pub played_at: i64,
    pub source: PlaySource,
}

impl PlayEvent {
    /// Minimal event with no catalog details
    #[cfg(test)]
    pub fn new(track_id: impl Into<String>, played_at: i64, source: PlaySource) -> Self {
        Self {
            track_id: track_id.into(),
            track_name: None,
            artists: Vec::new(),
            album_id: None,
            album_name: None,
            album_release_date: None,
            album_type: None,
            duration_ms: None,
            played_at,
            source,
        }
    }

    /// First credited artist, used in log lines
    pub fn primary_artist(&self) -> Option<&str> {
        self.artists.first().map(|a| a.name.as_str())
    }
}

/// A stored play joined with its catalog metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayRecord {
    pub id: i64,
    pub played_at: i64,
    pub track_id: String,
    pub track_name: Option<String>,
    pub artists: Vec<String>,
    pub album_id: Option<String>,
    pub album_name: Option<String>,
    pub duration_ms: Option<i64>,
    pub source: String,
}
