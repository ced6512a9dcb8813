//! Import from the old single-table `spotify_history` layout
//!
//! Older versions kept every play in one denormalized table with five artist
//! name columns and `played_at` stored either as ISO text or epoch ms. Rows
//! are converted into [`PlayEvent`]s and go through the normal
//! insert-if-absent path, so re-running an import is harmless.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use tracing::{info, warn};

use crate::db::tables::PlayTable;
use crate::models::{ArtistCredit, PlayEvent, PlaySource};
use crate::utils::dates::parse_played_at;

pub const LEGACY_TABLE: &str = "spotify_history";

/// Outcome of an import run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: u64,
    pub duplicates: u64,
    pub skipped: u64,
}

/// Database row for the legacy table, every column read as text
#[derive(Debug, FromRow)]
struct LegacyRow {
    track_id: Option<String>,
    track_name: Option<String>,
    artist_name_01: Option<String>,
    artist_name_02: Option<String>,
    artist_name_03: Option<String>,
    artist_name_04: Option<String>,
    artist_name_05: Option<String>,
    album_id: Option<String>,
    album_name: Option<String>,
    album_release_date: Option<String>,
    album_type: Option<String>,
    duration_ms: Option<i64>,
    played_at: Option<String>,
}

impl LegacyRow {
    fn into_event(self) -> Option<PlayEvent> {
        let track_id = self.track_id.filter(|id| !id.trim().is_empty())?;
        let played_at = self.played_at.as_deref().and_then(parse_played_at)?;

        let artists = [
            self.artist_name_01,
            self.artist_name_02,
            self.artist_name_03,
            self.artist_name_04,
            self.artist_name_05,
        ]
        .into_iter()
        .flatten()
        .filter(|name| !name.trim().is_empty())
        .map(|name| ArtistCredit::new(None, name))
        .collect();

        Some(PlayEvent {
            track_id,
            track_name: self.track_name,
            artists,
            album_id: self.album_id,
            album_name: self.album_name,
            album_release_date: self.album_release_date,
            album_type: self.album_type,
            duration_ms: self.duration_ms,
            played_at,
            source: PlaySource::Legacy,
        })
    }
}

/// Whether `pool` still carries the legacy table
pub async fn has_legacy_table(pool: &SqlitePool) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
        .bind(LEGACY_TABLE)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Copy legacy rows from `source` into the canonical tables of `target`
pub async fn import_table(source: &SqlitePool, target: &SqlitePool) -> Result<ImportReport> {
    let rows: Vec<LegacyRow> = sqlx::query_as(
        r#"
        SELECT
            CAST(track_id AS TEXT) AS track_id,
            CAST(track_name AS TEXT) AS track_name,
            CAST(artist_name_01 AS TEXT) AS artist_name_01,
            CAST(artist_name_02 AS TEXT) AS artist_name_02,
            CAST(artist_name_03 AS TEXT) AS artist_name_03,
            CAST(artist_name_04 AS TEXT) AS artist_name_04,
            CAST(artist_name_05 AS TEXT) AS artist_name_05,
            CAST(album_id AS TEXT) AS album_id,
            CAST(album_name AS TEXT) AS album_name,
            CAST(album_release_date AS TEXT) AS album_release_date,
            CAST(album_type AS TEXT) AS album_type,
            CAST(duration_ms AS INTEGER) AS duration_ms,
            CAST(played_at AS TEXT) AS played_at
        FROM spotify_history
        ORDER BY id
        "#,
    )
    .fetch_all(source)
    .await
    .context("Failed to read legacy rows")?;

    let mut report = ImportReport::default();
    for row in rows {
        let Some(event) = row.into_event() else {
            report.skipped += 1;
            continue;
        };

        match PlayTable::insert_if_absent(target, &event).await? {
            Some(_) => report.imported += 1,
            None => report.duplicates += 1,
        }
    }

    Ok(report)
}

/// Import a legacy database file into `target`
pub async fn import_from_file(target: &SqlitePool, path: &Path) -> Result<ImportReport> {
    let options = SqliteConnectOptions::new().filename(path).read_only(true);
    let source = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open legacy database {:?}", path))?;

    if !has_legacy_table(&source).await? {
        warn!(path = ?path, "No {} table found, nothing to import", LEGACY_TABLE);
        source.close().await;
        return Ok(ImportReport::default());
    }

    let report = import_table(&source, target).await;
    source.close().await;
    let report = report?;

    info!(
        imported = report.imported,
        duplicates = report.duplicates,
        skipped = report.skipped,
        "Legacy import finished"
    );
    Ok(report)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use sqlx::SqlitePool;

    /// Create the old table layout and fill it with a few representative rows
    pub async fn create_legacy_table(pool: &SqlitePool) {
        sqlx::query(
            r#"
            CREATE TABLE spotify_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                track_id TEXT,
                track_name TEXT,
                artist_name_01 TEXT,
                artist_name_02 TEXT,
                artist_name_03 TEXT,
                artist_name_04 TEXT,
                artist_name_05 TEXT,
                album_id TEXT,
                album_name TEXT,
                album_release_date TEXT,
                album_type TEXT,
                duration_ms INTEGER,
                played_at TEXT
            );
            INSERT INTO spotify_history (track_id, track_name, artist_name_01, artist_name_02, album_id, album_name, duration_ms, played_at)
            VALUES
                ('t1', 'One', 'Alpha', 'Beta', 'al1', 'First', 180000, '2024-03-01T12:00:00.000Z'),
                ('t2', 'Two', 'Alpha', NULL, 'al1', 'First', 200000, '1709298000000'),
                ('t2', 'Two', 'Alpha', NULL, 'al1', 'First', 200000, '1709298000000'),
                (NULL, 'Local file', 'Someone', NULL, NULL, NULL, 1000, '2024-03-01T13:00:00Z'),
                ('t3', 'Three', 'Gamma', NULL, NULL, NULL, 1000, 'not a time');
            "#,
        )
        .execute(pool)
        .await
        .unwrap();
    }
}
