//! Change feed: tails the plays table by id and fans new rows out to subscribers

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::broadcast::SubscriberRegistry;
use crate::config::FeedSettings;
use crate::errors::HistoryResult;
use crate::models::PlayRecord;

/// A store that can be tailed by a monotonically increasing id
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Highest id currently stored, 0 when empty
    async fn max_id(&self) -> HistoryResult<i64>;

    /// Rows with `id > cursor`, ascending by id, at most `limit`
    async fn fetch_since(&self, cursor: i64, limit: u32) -> HistoryResult<Vec<PlayRecord>>;
}

/// Serialize a record the way SSE clients expect it
pub fn update_message(record: &PlayRecord) -> HistoryResult<String> {
    Ok(serde_json::to_string(&json!({
        "type": "new_play",
        "data": record,
    }))?)
}

pub struct ChangeFeed {
    source: Arc<dyn ChangeSource>,
    registry: Arc<SubscriberRegistry>,
    settings: FeedSettings,
}

impl ChangeFeed {
    pub fn new(source: Arc<dyn ChangeSource>, registry: Arc<SubscriberRegistry>, settings: FeedSettings) -> Self {
        Self {
            source,
            registry,
            settings,
        }
    }

    fn page_size(&self) -> u32 {
        self.settings.page_size.max(1)
    }

    /// Start at the current tip; history is never replayed
    async fn initial_cursor(&self) -> i64 {
        loop {
            match self.source.max_id().await {
                Ok(id) => return id,
                Err(e) => {
                    error!("Change feed could not read max id: {}", e);
                    sleep(self.settings.error_retry()).await;
                }
            }
        }
    }

    /// Fetch one page after `cursor`, broadcast it and advance the cursor.
    ///
    /// Returns the number of rows fetched.
    pub async fn step(&self, cursor: &mut i64) -> HistoryResult<usize> {
        let rows = self
            .source
            .fetch_since(*cursor, self.page_size())
            .await?;

        // nobody listening: just move the cursor
        if !self.registry.is_empty() {
            for record in &rows {
                match update_message(record) {
                    Ok(message) => {
                        let stats = self.registry.broadcast(&message);
                        debug!(id = record.id, delivered = stats.delivered, "Broadcast play");
                    }
                    Err(e) => warn!(id = record.id, "Skipping unserializable play: {}", e),
                }
            }
        }

        if let Some(last) = rows.last() {
            *cursor = last.id;
        }
        Ok(rows.len())
    }

    /// Run forever
    pub async fn run(self) {
        let mut cursor = self.initial_cursor().await;
        info!(cursor, "Change feed started");

        loop {
            match self.step(&mut cursor).await {
                // a full page means there is probably more waiting
                Ok(fetched) if fetched as u64 >= u64::from(self.page_size()) => continue,
                Ok(_) => sleep(self.settings.interval()).await,
                Err(e) => {
                    error!("Change feed read failed: {}", e);
                    sleep(self.settings.error_retry()).await;
                }
            }
        }
    }
}
