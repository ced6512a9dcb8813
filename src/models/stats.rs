//! Analytics read models

use serde::Serialize;

/// A ranked item in a top-N list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedItem {
    pub id: String,
    pub name: String,
    pub plays: i64,
    pub listened_ms: i64,
}

/// Totals for a time window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowTotals {
    pub plays: i64,
    pub unique_tracks: i64,
    pub unique_artists: i64,
    pub listened_ms: i64,
}

/// Response body for `/analytics`
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsReport {
    pub window: String,
    pub start: i64,
    pub end: i64,
    pub totals: WindowTotals,
    pub top_tracks: Vec<RankedItem>,
    pub top_artists: Vec<RankedItem>,
    pub top_albums: Vec<RankedItem>,
    /// 24 buckets, index is the UTC hour
    pub plays_by_hour: Vec<i64>,
}

/// One UTC day of listening
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyListening {
    pub day: String,
    pub plays: i64,
    pub listened_ms: i64,
}

/// Response body for `/listening-time`
#[derive(Debug, Clone, Serialize)]
pub struct ListeningTimeReport {
    pub window: String,
    pub start: i64,
    pub end: i64,
    pub total_ms: i64,
    pub total_human: String,
    pub days: Vec<DailyListening>,
}
