//! Aggregates over a trailing window

use actix_web::{get, web, HttpResponse, Responder};
use serde::Deserialize;

use super::{error_response, AppState};
use crate::db::tables::StatsTable;
use crate::errors::HistoryResult;
use crate::models::{AnalyticsReport, ListeningTimeReport};
use crate::utils::dates::{now_ms, seconds_to_human_readable, window_range_ms};

const TOP_N: u32 = 10;

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    #[serde(default = "default_window")]
    pub window: String,
}

fn default_window() -> String {
    "7d".to_string()
}

async fn build_analytics(state: &AppState, window: &str, now: i64) -> HistoryResult<AnalyticsReport> {
    let (start, end) = window_range_ms(window, now)?;
    let pool = state.db.pool();

    Ok(AnalyticsReport {
        window: window.to_string(),
        start,
        end,
        totals: StatsTable::totals(pool, start, end).await?,
        top_tracks: StatsTable::top_tracks(pool, start, end, TOP_N).await?,
        top_artists: StatsTable::top_artists(pool, start, end, TOP_N).await?,
        top_albums: StatsTable::top_albums(pool, start, end, TOP_N).await?,
        plays_by_hour: StatsTable::plays_by_hour(pool, start, end).await?,
    })
}

async fn build_listening_time(state: &AppState, window: &str, now: i64) -> HistoryResult<ListeningTimeReport> {
    let (start, end) = window_range_ms(window, now)?;
    let days = StatsTable::daily_listening(state.db.pool(), start, end).await?;
    let total_ms: i64 = days.iter().map(|d| d.listened_ms).sum();

    Ok(ListeningTimeReport {
        window: window.to_string(),
        start,
        end,
        total_ms,
        total_human: seconds_to_human_readable(total_ms / 1000),
        days,
    })
}

/// Totals, top lists and hour-of-day distribution
#[get("/analytics")]
pub async fn analytics(state: web::Data<AppState>, query: web::Query<WindowQuery>) -> impl Responder {
    match build_analytics(&state, &query.window, now_ms()).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => error_response(&e),
    }
}

/// Listening time per UTC day
#[get("/listening-time")]
pub async fn listening_time(state: web::Data<AppState>, query: web::Query<WindowQuery>) -> impl Responder {
    match build_listening_time(&state, &query.window, now_ms()).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => error_response(&e),
    }
}
