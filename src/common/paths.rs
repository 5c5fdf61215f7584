//! Configuration and log file locations
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/rwb-debugger/` and `~/.local/share/rwb-debugger/`
//! - macOS: `~/Library/Application Support/rwb-debugger/`
//! - Windows: `%APPDATA%\rwb-debugger\`

use std::path::PathBuf;

/// Application name used for per-user directories
const APP_NAME: &str = "rwb-debugger";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}
