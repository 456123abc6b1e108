//! Removal of every generated directory, for a fresh start.

use std::path::PathBuf;

use tracing::debug;

use crate::config::Config;

/// Remove the artifact, output, build and test scratch directories.
/// Returns the directories that existed; missing ones are skipped, so a
/// second call removes nothing.
pub fn clear(config: &Config) -> std::io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for dir in config.clearable_dirs() {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => {
                debug!("Removed {}", dir.display());
                removed.push(dir.to_path_buf());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}
