//! Database module for playlog
//!
//! All storage goes through SQLx with SQLite.

mod engine;
pub mod legacy;
mod migrations;
mod store;
pub mod tables;

pub use engine::DbEngine;
pub use migrations::run_migrations;
pub use store::FeedReader;
pub use tables::*;

#[cfg(test)]
pub(crate) use engine::testing;
