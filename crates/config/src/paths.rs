//! Path utilities

use std::path::{Path, PathBuf};

/// Data directory (~/.reagent), falling back to a relative `.reagent`
/// when no home directory can be resolved.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".reagent"))
        .unwrap_or_else(|| PathBuf::from(".reagent"))
}

/// Configuration file location
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// Default workspace location for workspace-confined tools
pub fn workspace_path() -> PathBuf {
    data_dir().join("workspace")
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Ensure directory exists
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}
