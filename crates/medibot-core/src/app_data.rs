//! Where medibot stores its own state (config, ingestion checkpoint).
//!
//! Source documents stay wherever the user keeps them. We only store app state here.

use std::path::PathBuf;

/// Returns the directory where medibot stores config and checkpoints.
/// On Linux: `~/.local/share/medibot/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "Medibot", "medibot")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Path of a file inside the app data directory, if the directory is available.
pub(crate) fn app_data_file(name: &str) -> Option<PathBuf> {
    app_data_dir().map(|d| d.join(name))
}
