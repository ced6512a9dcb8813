//! Catalog (albums, artists, tracks) table operations

use sqlx::SqliteConnection;

use crate::models::PlayEvent;

/// Catalog upserts. Newer metadata overwrites older, blanks never erase.
pub struct CatalogTable;

impl CatalogTable {
    /// Upsert the album, artists and track referenced by `event`
    pub async fn upsert_for(conn: &mut SqliteConnection, event: &PlayEvent) -> Result<(), sqlx::Error> {
        if let Some(album_id) = event.album_id.as_deref().filter(|id| !id.is_empty()) {
            sqlx::query(
                r#"
                INSERT INTO albums (id, name, release_date, album_type) VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    name = COALESCE(excluded.name, albums.name),
                    release_date = COALESCE(excluded.release_date, albums.release_date),
                    album_type = COALESCE(excluded.album_type, albums.album_type)
                "#,
            )
            .bind(album_id)
            .bind(&event.album_name)
            .bind(&event.album_release_date)
            .bind(&event.album_type)
            .execute(&mut *conn)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO tracks (id, name, album_id, duration_ms) VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = COALESCE(excluded.name, tracks.name),
                album_id = COALESCE(excluded.album_id, tracks.album_id),
                duration_ms = COALESCE(excluded.duration_ms, tracks.duration_ms)
            "#,
        )
        .bind(&event.track_id)
        .bind(&event.track_name)
        .bind(event.album_id.as_deref().filter(|id| !id.is_empty()))
        .bind(event.duration_ms)
        .execute(&mut *conn)
        .await?;

        if event.artists.is_empty() {
            return Ok(());
        }

        for artist in &event.artists {
            sqlx::query(
                "INSERT INTO artists (id, name) VALUES (?, ?) ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            )
            .bind(&artist.id)
            .bind(&artist.name)
            .execute(&mut *conn)
            .await?;
        }

        sqlx::query("DELETE FROM track_artists WHERE track_id = ?")
            .bind(&event.track_id)
            .execute(&mut *conn)
            .await?;

        for (position, artist) in event.artists.iter().enumerate() {
            sqlx::query("INSERT INTO track_artists (track_id, artist_id, position) VALUES (?, ?, ?)")
                .bind(&event.track_id)
                .bind(&artist.id)
                .bind(position as i64)
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }
}
