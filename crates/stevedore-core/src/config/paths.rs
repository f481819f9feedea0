//! Default path resolution.

use std::path::PathBuf;

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("stevedore").join("stevedore.toml"))
}

pub fn default_work_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("stevedore")
        .join("work")
}
