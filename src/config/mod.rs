//! Configuration module for playlog
//!
//! Settings structures and config file discovery.

mod paths;
mod settings;

pub use paths::{ensure_parent_dir, resolve_config_file};
pub use settings::{
    DatabaseSettings, FeedSettings, LogFormat, LoggingSettings, PollerSettings, Settings,
    SpotifySettings,
};
