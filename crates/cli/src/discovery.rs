//! Finding image files under a directory

use anyhow::{Context, Result};
use fleetindex_core::is_image_path;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Absolute paths of every image under `root`, sorted
///
/// Unreadable entries are skipped with a debug log.
pub fn find_images(root: &Path) -> Result<Vec<String>> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Image directory not found: {}", root.display()))?;
    if !root.is_dir() {
        anyhow::bail!("Not a directory: {}", root.display());
    }

    let mut images: Vec<String> = WalkDir::new(&root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping unreadable entry: {e}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_image_path(entry.path()))
        .map(|entry| entry.path().to_string_lossy().into_owned())
        .collect();
    images.sort();

    info!("Found {} images under {}", images.len(), root.display());
    Ok(images)
}
