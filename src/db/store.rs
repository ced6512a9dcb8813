//! Trait implementations that connect the core loops to SQLite

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::tables::PlayTable;
use super::DbEngine;
use crate::core::{ChangeSource, PlayStore};
use crate::errors::HistoryResult;
use crate::models::{PlayEvent, PlayRecord};

#[async_trait]
impl PlayStore for DbEngine {
    async fn watermark(&self) -> HistoryResult<Option<i64>> {
        PlayTable::watermark(self.pool()).await
    }

    async fn insert_play(&self, event: &PlayEvent) -> HistoryResult<Option<i64>> {
        PlayTable::insert_if_absent(self.pool(), event).await
    }

    async fn play_of_track_between(&self, track_id: &str, from: i64, to: i64) -> HistoryResult<Option<i64>> {
        PlayTable::play_of_track_between(self.pool(), track_id, from, to).await
    }
}

/// Change source reading through its own pool
pub struct FeedReader {
    pool: SqlitePool,
}

impl FeedReader {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChangeSource for FeedReader {
    async fn max_id(&self) -> HistoryResult<i64> {
        PlayTable::max_id(&self.pool).await
    }

    async fn fetch_since(&self, cursor: i64, limit: u32) -> HistoryResult<Vec<PlayRecord>> {
        PlayTable::fetch_since(&self.pool, cursor, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Ingestor, SubscriberRegistry};
    use crate::db::engine::testing::temp_engine;
    use crate::models::PlaySource;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ingest_through_sqlite() {
        let (engine, _settings, _dir) = temp_engine().await;
        let ingestor = Ingestor::new(Arc::new(engine.clone()), Duration::from_secs(300));

        let batch = vec![
            PlayEvent::new("b", 2_000, PlaySource::Recent),
            PlayEvent::new("a", 1_000, PlaySource::Recent),
        ];
        let report = ingestor.ingest_recent(batch.clone()).await.unwrap();
        assert_eq!(report.inserted, 2);

        let again = ingestor.ingest_recent(batch).await.unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(PlayTable::count(engine.pool()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_feed_reader_sees_writes_from_main_pool() {
        let (engine, settings, _dir) = temp_engine().await;
        let reader = FeedReader::new(DbEngine::open_reader(&settings).await.unwrap());
        let registry = Arc::new(SubscriberRegistry::new(16));
        let sub = registry.subscribe();

        let cursor_start = reader.max_id().await.unwrap();
        assert_eq!(cursor_start, 0);

        engine
            .insert_play(&PlayEvent::new("t1", 1_000, PlaySource::Recent))
            .await
            .unwrap();

        let feed = crate::core::ChangeFeed::new(Arc::new(reader), registry.clone(), Default::default());
        let mut cursor = cursor_start;
        assert_eq!(feed.step(&mut cursor).await.unwrap(), 1);
        assert_eq!(cursor, 1);

        let message = sub.try_next().unwrap();
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["data"]["track_id"], "t1");
    }
}
