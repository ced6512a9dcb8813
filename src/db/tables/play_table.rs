//! Play table operations

use sqlx::{FromRow, SqlitePool};

use super::CatalogTable;
use crate::errors::HistoryResult;
use crate::models::{PlayEvent, PlayRecord, PlaySource};

/// Plays joined with their catalog rows. Artist names come back as a JSON array
/// in billing order.
const RECORD_SELECT: &str = r#"
    SELECT
        p.id,
        p.played_at,
        p.track_id,
        t.name AS track_name,
        (
            SELECT json_group_array(name) FROM (
                SELECT a.name AS name
                FROM track_artists ta
                JOIN artists a ON a.id = ta.artist_id
                WHERE ta.track_id = p.track_id
                ORDER BY ta.position
            )
        ) AS artists,
        t.album_id,
        al.name AS album_name,
        t.duration_ms,
        p.source
    FROM plays p
    JOIN tracks t ON t.id = p.track_id
    LEFT JOIN albums al ON al.id = t.album_id
"#;

/// Database row for the joined play query
#[derive(Debug, FromRow)]
struct PlayRow {
    id: i64,
    played_at: i64,
    track_id: String,
    track_name: Option<String>,
    artists: Option<String>,
    album_id: Option<String>,
    album_name: Option<String>,
    duration_ms: Option<i64>,
    source: String,
}

impl PlayRow {
    fn into_record(self) -> PlayRecord {
        let artists = self
            .artists
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();

        PlayRecord {
            id: self.id,
            played_at: self.played_at,
            track_id: self.track_id,
            track_name: self.track_name,
            artists,
            album_id: self.album_id,
            album_name: self.album_name,
            duration_ms: self.duration_ms,
            source: self.source,
        }
    }
}

/// Play table operations
pub struct PlayTable;

impl PlayTable {
    /// Insert a play unless `(track_id, played_at)` is already stored.
    ///
    /// Returns the new row id, or `None` when the play was already there.
    /// Catalog rows are refreshed in the same transaction either way.
    pub async fn insert_if_absent(pool: &SqlitePool, event: &PlayEvent) -> HistoryResult<Option<i64>> {
        let mut tx = pool.begin().await?;

        CatalogTable::upsert_for(&mut *tx, event).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO plays (track_id, played_at, source) VALUES (?, ?, ?)
            ON CONFLICT(track_id, played_at) DO NOTHING
            "#,
        )
        .bind(&event.track_id)
        .bind(event.played_at)
        .bind(event.source.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if result.rows_affected() == 0 {
            Ok(None)
        } else {
            Ok(Some(result.last_insert_rowid()))
        }
    }

    /// Latest stored history `played_at`, the ingestion watermark.
    ///
    /// Live rows are left out: a track seen playing must not hide earlier
    /// plays that have not come through recently played yet.
    pub async fn watermark(pool: &SqlitePool) -> HistoryResult<Option<i64>> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(played_at) FROM plays WHERE source <> ?")
            .bind(PlaySource::NowPlaying.as_str())
            .fetch_one(pool)
            .await?;
        Ok(max)
    }

    /// Most recent play of `track_id` with `played_at` inside `[from, to]`
    pub async fn play_of_track_between(
        pool: &SqlitePool,
        track_id: &str,
        from: i64,
        to: i64,
    ) -> HistoryResult<Option<i64>> {
        let played_at: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT played_at FROM plays
            WHERE track_id = ? AND played_at >= ? AND played_at <= ?
            ORDER BY played_at DESC
            LIMIT 1
            "#,
        )
        .bind(track_id)
        .bind(from)
        .bind(to)
        .fetch_optional(pool)
        .await?;
        Ok(played_at)
    }

    /// Highest play id, 0 when empty
    pub async fn max_id(pool: &SqlitePool) -> HistoryResult<i64> {
        let max: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM plays")
            .fetch_one(pool)
            .await?;
        Ok(max)
    }

    /// Plays with `id > cursor`, ascending, at most `limit`
    pub async fn fetch_since(pool: &SqlitePool, cursor: i64, limit: u32) -> HistoryResult<Vec<PlayRecord>> {
        let sql = format!("{RECORD_SELECT} WHERE p.id > ? ORDER BY p.id ASC LIMIT ?");
        let rows: Vec<PlayRow> = sqlx::query_as(&sql)
            .bind(cursor)
            .bind(limit as i64)
            .fetch_all(pool)
            .await?;
        Ok(rows.into_iter().map(PlayRow::into_record).collect())
    }

    /// Newest plays first
    pub async fn recent(pool: &SqlitePool, limit: u32) -> HistoryResult<Vec<PlayRecord>> {
        let sql = format!("{RECORD_SELECT} ORDER BY p.played_at DESC, p.id DESC LIMIT ?");
        let rows: Vec<PlayRow> = sqlx::query_as(&sql).bind(limit as i64).fetch_all(pool).await?;
        Ok(rows.into_iter().map(PlayRow::into_record).collect())
    }

    /// Count all stored plays
    pub async fn count(pool: &SqlitePool) -> HistoryResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM plays").fetch_one(pool).await?;
        Ok(count)
    }
}
