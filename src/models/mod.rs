//! Data models for playlog

mod play;
mod stats;

pub use play::{ArtistCredit, PlayEvent, PlayRecord, PlaySource};
pub use stats::{AnalyticsReport, DailyListening, ListeningTimeReport, RankedItem, WindowTotals};
