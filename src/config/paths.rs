//! Config file discovery

use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "playlog.toml";

/// Pick the settings file to load.
///
/// An explicit path always wins. Otherwise `playlog.toml` in the working
/// directory, then in the platform config directory. `None` means the
/// defaults and environment alone.
pub fn resolve_config_file(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }

    project_config_dir()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .filter(|p| p.is_file())
}

/// Platform config directory for playlog, e.g. `~/.config/playlog`
pub fn project_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "playlog").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Make sure the directory holding `db_path` exists
pub fn ensure_parent_dir(db_path: &Path) -> std::io::Result<()> {
    match db_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
