//! Configuration file discovery
//!
//! Finds configuration files in standard locations.

use std::path::{Path, PathBuf};

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./xbrowser.yaml",
    "./xbrowser.yml",
    "./xbrowser.json",
    "./.xbrowser.yaml",
    "~/.config/xbrowser/config.yaml",
    "~/.xbrowser.yaml",
];

/// Find configuration file in standard locations
pub fn find_config() -> Option<PathBuf> {
    CONFIG_LOCATIONS
        .iter()
        .map(|location| expand_path(location))
        .find(|path| path.exists())
}

/// Expand ~ to home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
pub fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
