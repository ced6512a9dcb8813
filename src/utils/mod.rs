//! Utility modules for playlog

pub mod dates;
