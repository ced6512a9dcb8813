//! Database table operations

mod catalog_table;
mod play_table;
mod stats_table;

pub use catalog_table::CatalogTable;
pub use play_table::PlayTable;
pub use stats_table::StatsTable;
