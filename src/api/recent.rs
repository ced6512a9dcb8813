//! Recent plays

use actix_web::{get, web, HttpResponse, Responder};
use serde::Deserialize;

use super::{error_response, AppState};
use crate::db::tables::PlayTable;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

/// Raw query; `limit` stays a string so junk falls back to the default
#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<String>,
}

/// Parse and clamp a `limit` parameter
pub fn clamp_limit(raw: Option<&str>) -> u32 {
    match raw.map(str::trim).and_then(|s| s.parse::<i64>().ok()) {
        Some(n) => n.clamp(1, i64::from(MAX_LIMIT)) as u32,
        None => DEFAULT_LIMIT,
    }
}

/// Newest plays first
#[get("/recent")]
pub async fn recent(state: web::Data<AppState>, query: web::Query<RecentQuery>) -> impl Responder {
    let limit = clamp_limit(query.limit.as_deref());
    match PlayTable::recent(state.db.pool(), limit).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => error_response(&e),
    }
}
