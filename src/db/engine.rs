//! Database engine and connection management

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;

use crate::config::{ensure_parent_dir, DatabaseSettings};

/// Database engine wrapper
///
/// Cheap to clone; every clone shares the same pool. Handlers acquire a
/// connection per query and the pool takes it back on drop, error paths
/// included.
#[derive(Clone, Debug)]
pub struct DbEngine {
    pool: SqlitePool,
}

impl DbEngine {
    /// Open (creating if needed) the main database and make sure the schema exists
    pub async fn open(settings: &DatabaseSettings) -> Result<Self> {
        ensure_parent_dir(&settings.path).context("Failed to create database directory")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .min_connections(1)
            .acquire_timeout(settings.acquire_timeout())
            .connect_with(connect_options(&settings.path, settings.busy_timeout())?)
            .await
            .context("Failed to connect to database")?;

        let engine = Self { pool };
        engine.create_tables().await?;
        Ok(engine)
    }

    /// Open a dedicated single-connection pool for a background reader
    ///
    /// The change feed tails the plays table on its own connection so it
    /// never competes with request handlers for the shared pool.
    pub async fn open_reader(settings: &DatabaseSettings) -> Result<SqlitePool> {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .acquire_timeout(settings.acquire_timeout())
            .connect_with(connect_options(&settings.path, settings.busy_timeout())?)
            .await
            .context("Failed to open reader connection")
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap liveness probe
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create all database tables
    async fn create_tables(&self) -> Result<()> {
        let pool = &self.pool;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS albums (
                id TEXT PRIMARY KEY,
                name TEXT,
                release_date TEXT,
                album_type TEXT
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artists (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracks (
                id TEXT PRIMARY KEY,
                name TEXT,
                album_id TEXT REFERENCES albums(id),
                duration_ms INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_tracks_album_id ON tracks(album_id);
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS track_artists (
                track_id TEXT NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
                artist_id TEXT NOT NULL REFERENCES artists(id),
                position INTEGER NOT NULL,
                PRIMARY KEY (track_id, position)
            );
            CREATE INDEX IF NOT EXISTS idx_track_artists_artist_id ON track_artists(artist_id);
            "#,
        )
        .execute(pool)
        .await?;

        // (track_id, played_at) uniqueness is what makes inserts idempotent
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS plays (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                track_id TEXT NOT NULL REFERENCES tracks(id),
                played_at INTEGER NOT NULL,
                source TEXT NOT NULL DEFAULT 'recent',
                UNIQUE (track_id, played_at)
            );
            CREATE INDEX IF NOT EXISTS idx_plays_played_at ON plays(played_at);
            "#,
        )
        .execute(pool)
        .await?;

        // Migration table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dbmigration (
                id INTEGER PRIMARY KEY,
                version INTEGER NOT NULL DEFAULT 0
            );
            INSERT OR IGNORE INTO dbmigration (id, version) VALUES (1, 0);
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

fn connect_options(path: &Path, busy_timeout: Duration) -> Result<SqliteConnectOptions> {
    Ok(SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(busy_timeout)
        .foreign_keys(true))
}


#[cfg(test)]
mod tests {
    use super::testing::temp_engine;

    #[tokio::test]
    async fn test_open_creates_schema() {
        let (engine, settings, _dir) = temp_engine().await;
        engine.ping().await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(engine.pool())
        .await
        .unwrap();
        assert_eq!(
            tables,
            vec!["albums", "artists", "dbmigration", "plays", "track_artists", "tracks"]
        );

        // reopening an existing file is harmless
        super::DbEngine::open(&settings).await.unwrap();
    }
}
