//! Incremental ingestion and deduplication
//!
//! Recently played batches are filtered against a watermark: the latest
//! `played_at` already stored from history. Live now-playing rows do not
//! move it. Candidates are walked oldest first and only
//! accepted when strictly newer than the running watermark, so overlapping
//! polls and repeated batches never produce a second row. The store's
//! `(track_id, played_at)` uniqueness backs this up.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::HistoryResult;
use crate::models::PlayEvent;
use crate::utils::dates::format_datetime;

/// What the ingestion step needs from the durable store
#[async_trait]
pub trait PlayStore: Send + Sync {
    /// Latest stored `played_at` excluding now-playing rows, `None` when there is none
    async fn watermark(&self) -> HistoryResult<Option<i64>>;

    /// Insert-if-absent; `Some(id)` when a row was written
    async fn insert_play(&self, event: &PlayEvent) -> HistoryResult<Option<i64>>;

    /// Any stored play of `track_id` with `played_at` in `[from, to]`
    async fn play_of_track_between(&self, track_id: &str, from: i64, to: i64) -> HistoryResult<Option<i64>>;
}

/// Pick the events to insert from a batch, oldest first.
///
/// The batch may arrive in any order. Each accepted event moves the running
/// watermark, so duplicates inside the batch are dropped too.
pub fn select_new_plays(watermark: Option<i64>, mut batch: Vec<PlayEvent>) -> Vec<PlayEvent> {
    batch.sort_by_key(|event| event.played_at);

    let mut mark = watermark;
    batch
        .into_iter()
        .filter(|event| {
            let newer = mark.map_or(true, |m| event.played_at > m);
            if newer {
                mark = Some(event.played_at);
            }
            newer
        })
        .collect()
}

/// Result of ingesting one recently-played batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub fetched: usize,
    pub inserted: usize,
    /// At or below the watermark, or already present in the store
    pub skipped: usize,
    pub watermark: Option<i64>,
}

/// Result of ingesting a currently-playing item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NowPlayingOutcome {
    Inserted(i64),
    /// A play of the same track was stored at this time, close enough to count
    AlreadyRecorded(i64),
    /// Insert-if-absent found the exact `(track_id, played_at)` already stored
    Duplicate,
}

/// Applies the dedup rules and writes through a [`PlayStore`]
pub struct Ingestor {
    store: Arc<dyn PlayStore>,
    now_playing_window: Duration,
}

impl Ingestor {
    pub fn new(store: Arc<dyn PlayStore>, now_playing_window: Duration) -> Self {
        Self {
            store,
            now_playing_window,
        }
    }

    /// Store every event from `batch` that is newer than the current watermark
    pub async fn ingest_recent(&self, batch: Vec<PlayEvent>) -> HistoryResult<IngestReport> {
        let fetched = batch.len();
        let watermark = self.store.watermark().await?;
        let fresh = select_new_plays(watermark, batch);

        let mut report = IngestReport {
            fetched,
            skipped: fetched - fresh.len(),
            watermark,
            ..IngestReport::default()
        };

        for event in &fresh {
            match self.store.insert_play(event).await? {
                Some(id) => {
                    report.inserted += 1;
                    info!(
                        id,
                        track = event.track_name.as_deref().unwrap_or(&event.track_id),
                        artist = event.primary_artist().unwrap_or("unknown"),
                        played_at = %format_datetime(event.played_at),
                        "Stored play"
                    );
                }
                None => report.skipped += 1,
            }
            report.watermark = Some(event.played_at);
        }

        debug!(
            fetched = report.fetched,
            inserted = report.inserted,
            skipped = report.skipped,
            "Recently played batch ingested"
        );
        Ok(report)
    }

    /// Store the live item unless the same track was recorded within the window
    pub async fn ingest_now_playing(&self, event: &PlayEvent) -> HistoryResult<NowPlayingOutcome> {
        let window_ms = i64::try_from(self.now_playing_window.as_millis()).unwrap_or(i64::MAX);
        let from = event.played_at.saturating_sub(window_ms);
        let to = event.played_at.saturating_add(window_ms);

        if let Some(stored_at) = self
            .store
            .play_of_track_between(&event.track_id, from, to)
            .await?
        {
            return Ok(NowPlayingOutcome::AlreadyRecorded(stored_at));
        }

        match self.store.insert_play(event).await? {
            Some(id) => {
                info!(
                    id,
                    track = event.track_name.as_deref().unwrap_or(&event.track_id),
                    artist = event.primary_artist().unwrap_or("unknown"),
                    played_at = %format_datetime(event.played_at),
                    "Stored now playing"
                );
                Ok(NowPlayingOutcome::Inserted(id))
            }
            None => Ok(NowPlayingOutcome::Duplicate),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::errors::HistoryError;
    use crate::models::PlaySource;
    use parking_lot::Mutex;

    /// In-memory store with the same uniqueness rule as the SQLite one
    #[derive(Default)]
    pub struct MemoryStore {
        rows: Mutex<Vec<PlayEvent>>,
        pub fail_writes: Mutex<bool>,
    }

    impl MemoryStore {
        pub fn played_at(&self) -> Vec<i64> {
            self.rows.lock().iter().map(|e| e.played_at).collect()
        }

        pub fn rows(&self) -> Vec<PlayEvent> {
            self.rows.lock().clone()
        }
    }

    #[async_trait]
    impl PlayStore for MemoryStore {
        async fn watermark(&self) -> HistoryResult<Option<i64>> {
            Ok(self
                .rows
                .lock()
                .iter()
                .filter(|e| e.source != PlaySource::NowPlaying)
                .map(|e| e.played_at)
                .max())
        }

        async fn insert_play(&self, event: &PlayEvent) -> HistoryResult<Option<i64>> {
            if *self.fail_writes.lock() {
                return Err(HistoryError::StoreUnavailable("database is locked".into()));
            }
            let mut rows = self.rows.lock();
            if rows
                .iter()
                .any(|e| e.track_id == event.track_id && e.played_at == event.played_at)
            {
                return Ok(None);
            }
            rows.push(event.clone());
            Ok(Some(rows.len() as i64))
        }

        async fn play_of_track_between(&self, track_id: &str, from: i64, to: i64) -> HistoryResult<Option<i64>> {
            Ok(self
                .rows
                .lock()
                .iter()
                .filter(|e| e.track_id == track_id && e.played_at >= from && e.played_at <= to)
                .map(|e| e.played_at)
                .max())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryStore;
    use super::*;
    use crate::models::PlaySource;

    fn ev(track: &str, at: i64) -> PlayEvent {
        PlayEvent::new(track, at, PlaySource::Recent)
    }

    fn ingestor(store: &Arc<MemoryStore>) -> Ingestor {
        Ingestor::new(store.clone(), Duration::from_secs(300))
    }

    #[test]
    fn test_select_sorts_and_filters() {
        // newest-first, the way the provider returns it
        let batch = vec![ev("c", 300), ev("b", 200), ev("a", 100)];
        let picked: Vec<i64> = select_new_plays(None, batch).iter().map(|e| e.played_at).collect();
        assert_eq!(picked, vec![100, 200, 300]);

        let batch = vec![ev("x", 150), ev("y", 200), ev("z", 250)];
        let picked = select_new_plays(Some(200), batch);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].track_id, "z");
    }

    #[test]
    fn test_select_drops_duplicates_within_batch() {
        let batch = vec![ev("a", 100), ev("a", 100), ev("b", 100), ev("c", 101)];
        let picked: Vec<String> = select_new_plays(None, batch)
            .into_iter()
            .map(|e| e.track_id)
            .collect();
        // b shares a timestamp with a, so it is not strictly newer
        assert_eq!(picked, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_empty_store_takes_whole_batch() {
        let store = Arc::new(MemoryStore::default());
        let report = ingestor(&store)
            .ingest_recent(vec![ev("c", 300), ev("a", 100), ev("b", 200)])
            .await
            .unwrap();

        assert_eq!(report.inserted, 3);
        assert_eq!(report.watermark, Some(300));
        assert_eq!(store.played_at(), vec![100, 200, 300]);
        assert_eq!(store.watermark().await.unwrap(), Some(300));
    }

    #[tokio::test]
    async fn test_only_newer_than_watermark() {
        let store = Arc::new(MemoryStore::default());
        let ingestor = ingestor(&store);
        ingestor.ingest_recent(vec![ev("w", 200)]).await.unwrap();

        let report = ingestor
            .ingest_recent(vec![ev("x", 150), ev("y", 200), ev("z", 250)])
            .await
            .unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(store.played_at(), vec![200, 250]);
    }

    #[tokio::test]
    async fn test_same_batch_twice_is_idempotent() {
        let store = Arc::new(MemoryStore::default());
        let ingestor = ingestor(&store);
        let batch = vec![ev("a", 100), ev("b", 200), ev("c", 300)];

        ingestor.ingest_recent(batch.clone()).await.unwrap();
        let once = store.rows();

        let report = ingestor.ingest_recent(batch).await.unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(store.rows(), once);
    }

    #[tokio::test]
    async fn test_overlapping_polls_store_union_once() {
        let store = Arc::new(MemoryStore::default());
        let ingestor = ingestor(&store);

        // sliding windows of a 50-item "recently played" feed
        let polls: Vec<Vec<i64>> = vec![
            vec![10, 20, 30],
            vec![20, 30, 40, 50],
            vec![50, 60],
            vec![40, 50, 60],
            vec![60, 70, 80],
        ];
        for times in polls {
            let batch = times.iter().rev().map(|t| ev(&format!("t{t}"), *t)).collect();
            ingestor.ingest_recent(batch).await.unwrap();
        }

        assert_eq!(store.played_at(), vec![10, 20, 30, 40, 50, 60, 70, 80]);

        let mut pairs: Vec<(String, i64)> = store
            .rows()
            .into_iter()
            .map(|e| (e.track_id, e.played_at))
            .collect();
        let total = pairs.len();
        pairs.dedup();
        assert_eq!(pairs.len(), total);
    }

    #[tokio::test]
    async fn test_now_playing_window() {
        let t = 10_000_000;
        let store = Arc::new(MemoryStore::default());
        let ingestor = ingestor(&store);
        ingestor.ingest_recent(vec![ev("X", t - 60_000)]).await.unwrap();

        let live = PlayEvent::new("X", t, PlaySource::NowPlaying);
        assert_eq!(
            ingestor.ingest_now_playing(&live).await.unwrap(),
            NowPlayingOutcome::AlreadyRecorded(t - 60_000)
        );
        assert_eq!(store.rows().len(), 1);

        let store = Arc::new(MemoryStore::default());
        let ingestor = self::ingestor(&store);
        ingestor.ingest_recent(vec![ev("X", t - 600_000)]).await.unwrap();

        assert!(matches!(
            ingestor.ingest_now_playing(&live).await.unwrap(),
            NowPlayingOutcome::Inserted(_)
        ));
        assert_eq!(store.played_at(), vec![t - 600_000, t]);
    }

    #[tokio::test]
    async fn test_now_playing_repeat_poll_is_noop() {
        let store = Arc::new(MemoryStore::default());
        let ingestor = ingestor(&store);
        let live = PlayEvent::new("X", 5_000_000, PlaySource::NowPlaying);

        assert!(matches!(
            ingestor.ingest_now_playing(&live).await.unwrap(),
            NowPlayingOutcome::Inserted(_)
        ));
        assert_eq!(
            ingestor.ingest_now_playing(&live).await.unwrap(),
            NowPlayingOutcome::AlreadyRecorded(5_000_000)
        );
        assert_eq!(store.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_live_play_does_not_hide_earlier_history() {
        let store = Arc::new(MemoryStore::default());
        let ingestor = ingestor(&store);

        let live = PlayEvent::new("B", 100_500, PlaySource::NowPlaying);
        assert!(matches!(
            ingestor.ingest_now_playing(&live).await.unwrap(),
            NowPlayingOutcome::Inserted(_)
        ));

        // A finished before B started but only now shows up in history
        let report = ingestor.ingest_recent(vec![ev("A", 100_000)]).await.unwrap();
        assert_eq!(report.inserted, 1);

        let mut stored: Vec<(String, i64)> = store
            .rows()
            .into_iter()
            .map(|e| (e.track_id, e.played_at))
            .collect();
        stored.sort_by_key(|(_, at)| *at);
        assert_eq!(stored, vec![("A".to_string(), 100_000), ("B".to_string(), 100_500)]);

        // history still dedups against itself
        let again = ingestor.ingest_recent(vec![ev("A", 100_000)]).await.unwrap();
        assert_eq!(again.inserted, 0);
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let store = Arc::new(MemoryStore::default());
        *store.fail_writes.lock() = true;
        let err = ingestor(&store).ingest_recent(vec![ev("a", 1)]).await.unwrap_err();
        assert!(matches!(err, crate::errors::HistoryError::StoreUnavailable(_)));
    }
}
