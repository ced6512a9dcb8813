//! Aggregate queries behind the analytics endpoints
//!
//! All ranges are inclusive epoch-millisecond bounds on `plays.played_at`.
//! Listening time is approximated by the track duration of each play.

use sqlx::SqlitePool;

use crate::errors::HistoryResult;
use crate::models::{DailyListening, RankedItem, WindowTotals};

pub struct StatsTable;

impl StatsTable {
    pub async fn totals(pool: &SqlitePool, start: i64, end: i64) -> HistoryResult<WindowTotals> {
        let (plays, unique_tracks, listened_ms): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COUNT(DISTINCT p.track_id), COALESCE(SUM(t.duration_ms), 0)
            FROM plays p
            JOIN tracks t ON t.id = p.track_id
            WHERE p.played_at >= ? AND p.played_at <= ?
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(pool)
        .await?;

        let unique_artists: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT ta.artist_id)
            FROM plays p
            JOIN track_artists ta ON ta.track_id = p.track_id
            WHERE p.played_at >= ? AND p.played_at <= ?
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(pool)
        .await?;

        Ok(WindowTotals {
            plays,
            unique_tracks,
            unique_artists,
            listened_ms,
        })
    }

    pub async fn top_tracks(pool: &SqlitePool, start: i64, end: i64, limit: u32) -> HistoryResult<Vec<RankedItem>> {
        Self::ranked(
            pool,
            r#"
            SELECT t.id, COALESCE(t.name, t.id), COUNT(*) AS plays, COALESCE(SUM(t.duration_ms), 0) AS listened
            FROM plays p
            JOIN tracks t ON t.id = p.track_id
            WHERE p.played_at >= ? AND p.played_at <= ?
            GROUP BY t.id
            ORDER BY plays DESC, listened DESC, t.id
            LIMIT ?
            "#,
            start,
            end,
            limit,
        )
        .await
    }

    /// Every credited artist gets the full play
    pub async fn top_artists(pool: &SqlitePool, start: i64, end: i64, limit: u32) -> HistoryResult<Vec<RankedItem>> {
        Self::ranked(
            pool,
            r#"
            SELECT a.id, a.name, COUNT(*) AS plays, COALESCE(SUM(t.duration_ms), 0) AS listened
            FROM plays p
            JOIN tracks t ON t.id = p.track_id
            JOIN track_artists ta ON ta.track_id = p.track_id
            JOIN artists a ON a.id = ta.artist_id
            WHERE p.played_at >= ? AND p.played_at <= ?
            GROUP BY a.id
            ORDER BY plays DESC, listened DESC, a.id
            LIMIT ?
            "#,
            start,
            end,
            limit,
        )
        .await
    }

    pub async fn top_albums(pool: &SqlitePool, start: i64, end: i64, limit: u32) -> HistoryResult<Vec<RankedItem>> {
        Self::ranked(
            pool,
            r#"
            SELECT al.id, COALESCE(al.name, al.id), COUNT(*) AS plays, COALESCE(SUM(t.duration_ms), 0) AS listened
            FROM plays p
            JOIN tracks t ON t.id = p.track_id
            JOIN albums al ON al.id = t.album_id
            WHERE p.played_at >= ? AND p.played_at <= ?
            GROUP BY al.id
            ORDER BY plays DESC, listened DESC, al.id
            LIMIT ?
            "#,
            start,
            end,
            limit,
        )
        .await
    }

    /// 24 buckets indexed by UTC hour of day
    pub async fn plays_by_hour(pool: &SqlitePool, start: i64, end: i64) -> HistoryResult<Vec<i64>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT CAST(strftime('%H', p.played_at / 1000, 'unixepoch') AS INTEGER) AS hour, COUNT(*)
            FROM plays p
            WHERE p.played_at >= ? AND p.played_at <= ?
            GROUP BY hour
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;

        let mut buckets = vec![0_i64; 24];
        for (hour, count) in rows {
            if let Some(slot) = usize::try_from(hour).ok().and_then(|h| buckets.get_mut(h)) {
                *slot = count;
            }
        }
        Ok(buckets)
    }

    /// Per UTC day, oldest first; days without plays are omitted
    pub async fn daily_listening(pool: &SqlitePool, start: i64, end: i64) -> HistoryResult<Vec<DailyListening>> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT strftime('%Y-%m-%d', p.played_at / 1000, 'unixepoch') AS day,
                   COUNT(*),
                   COALESCE(SUM(t.duration_ms), 0)
            FROM plays p
            JOIN tracks t ON t.id = p.track_id
            WHERE p.played_at >= ? AND p.played_at <= ?
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(day, plays, listened_ms)| DailyListening {
                day,
                plays,
                listened_ms,
            })
            .collect())
    }

    async fn ranked(pool: &SqlitePool, sql: &str, start: i64, end: i64, limit: u32) -> HistoryResult<Vec<RankedItem>> {
        let rows: Vec<(String, String, i64, i64)> = sqlx::query_as(sql)
            .bind(start)
            .bind(end)
            .bind(limit as i64)
            .fetch_all(pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, plays, listened_ms)| RankedItem {
                id,
                name,
                plays,
                listened_ms,
            })
            .collect())
    }
}
