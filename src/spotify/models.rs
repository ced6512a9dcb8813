//! Lenient conversion of Spotify payloads into play events
//!
//! Payloads are walked as `serde_json::Value` rather than strict structs: one
//! bad item (a local file without an id, an episode, a missing timestamp)
//! is skipped with a warning instead of failing the whole batch.

use serde_json::Value;
use tracing::warn;

use super::NowPlaying;
use crate::errors::{HistoryError, HistoryResult};
use crate::models::{ArtistCredit, PlayEvent, PlaySource};
use crate::utils::dates::{normalize_epoch, now_ms, plausible_played_at, played_at_from_json};

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn artists_of(track: &Value) -> Vec<ArtistCredit> {
    track
        .get("artists")
        .and_then(Value::as_array)
        .map(|artists| {
            artists
                .iter()
                .filter_map(|artist| {
                    let name = str_field(artist, "name")?;
                    Some(ArtistCredit::new(str_field(artist, "id"), name))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Build an event from a track object, `None` when it has no usable id
fn event_from_track(track: &Value, played_at: i64, source: PlaySource) -> Option<PlayEvent> {
    if let Some(kind) = track.get("type").and_then(Value::as_str) {
        if kind != "track" {
            return None;
        }
    }

    let track_id = str_field(track, "id")?;
    let album = track.get("album").filter(|a| a.is_object());

    Some(PlayEvent {
        track_id,
        track_name: str_field(track, "name"),
        artists: artists_of(track),
        album_id: album.and_then(|a| str_field(a, "id")),
        album_name: album.and_then(|a| str_field(a, "name")),
        album_release_date: album.and_then(|a| str_field(a, "release_date")),
        album_type: album.and_then(|a| str_field(a, "album_type")),
        duration_ms: track.get("duration_ms").and_then(Value::as_i64),
        played_at,
        source,
    })
}

/// Parse a `/me/player/recently-played` body
pub fn parse_recently_played(body: &Value) -> HistoryResult<Vec<PlayEvent>> {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| HistoryError::MalformedPayload("recently played body has no items array".into()))?;

    let mut events = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let Some(played_at) = item.get("played_at").and_then(played_at_from_json) else {
            warn!(index, "Skipping recently played item without a usable played_at");
            continue;
        };
        let Some(track) = item.get("track") else {
            warn!(index, "Skipping recently played item without a track");
            continue;
        };
        match event_from_track(track, played_at, PlaySource::Recent) {
            Some(event) => events.push(event),
            None => warn!(index, "Skipping recently played item that is not a track with an id"),
        }
    }
    Ok(events)
}

/// Parse a `/me/player/currently-playing` body.
///
/// `played_at` is the payload's `timestamp`, falling back to now minus the
/// playback progress.
pub fn parse_currently_playing(body: &Value) -> HistoryResult<Option<NowPlaying>> {
    if !body.is_object() {
        return Err(HistoryError::MalformedPayload(
            "currently playing body is not an object".into(),
        ));
    }

    if let Some(kind) = body.get("currently_playing_type").and_then(Value::as_str) {
        if kind != "track" {
            return Ok(None);
        }
    }

    let Some(item) = body.get("item").filter(|i| i.is_object()) else {
        return Ok(None);
    };

    let is_playing = body.get("is_playing").and_then(Value::as_bool).unwrap_or(false);
    let progress_ms = body.get("progress_ms").and_then(Value::as_i64);
    let played_at = match body.get("timestamp").and_then(Value::as_i64).filter(|ts| *ts > 0) {
        Some(ts) => normalize_epoch(ts),
        None => now_ms()
            .checked_sub(progress_ms.unwrap_or(0))
            .and_then(plausible_played_at),
    };
    let Some(played_at) = played_at else {
        warn!("Skipping currently playing item without a usable timestamp");
        return Ok(None);
    };

    match event_from_track(item, played_at, PlaySource::NowPlaying) {
        Some(event) => Ok(Some(NowPlaying {
            is_playing,
            progress_ms,
            event,
        })),
        None => {
            warn!("Skipping currently playing item that is not a track with an id");
            Ok(None)
        }
    }
}
