//! REST API routes for playlog

pub mod analytics;
pub mod health;
pub mod recent;
pub mod stream;

use actix_web::{web, HttpResponse};
use serde_json::json;
use std::sync::Arc;

use crate::config::FeedSettings;
use crate::core::SubscriberRegistry;
use crate::db::DbEngine;
use crate::errors::HistoryError;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub db: DbEngine,
    pub registry: Arc<SubscriberRegistry>,
    pub feed: FeedSettings,
}

/// Configure all API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health::health)
        .service(recent::recent)
        .service(analytics::analytics)
        .service(analytics::listening_time)
        .service(stream::stream);
}

/// JSON error body with a status derived from the error kind
pub(crate) fn error_response(e: &HistoryError) -> HttpResponse {
    match e {
        HistoryError::Config(_) => HttpResponse::BadRequest().json(json!({ "error": e.to_string() })),
        HistoryError::StoreUnavailable(_) => {
            HttpResponse::ServiceUnavailable().json(json!({ "error": e.to_string() }))
        }
        _ => HttpResponse::InternalServerError().json(json!({ "error": e.to_string() })),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::db::testing::temp_engine;
    use tempfile::TempDir;

    /// State over a fresh temp database
    pub async fn temp_state() -> (AppState, TempDir) {
        let (db, _settings, dir) = temp_engine().await;
        let state = AppState {
            db,
            registry: Arc::new(SubscriberRegistry::new(16)),
            feed: FeedSettings::default(),
        };
        (state, dir)
    }
}
