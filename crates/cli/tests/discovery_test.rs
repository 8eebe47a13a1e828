//! Tests for image discovery

use anyhow::Result;
use fleetindex::discovery::find_images;
use std::fs;
use tempfile::TempDir;

fn touch(dir: &TempDir, rel: &str) -> Result<()> {
    let path = dir.path().join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, b"")?;
    Ok(())
}

#[test]
fn test_finds_nested_images_sorted() -> Result<()> {
    let dir = TempDir::new()?;
    touch(&dir, "b.png")?;
    touch(&dir, "a.jpg")?;
    touch(&dir, "2024/trip/c.JPEG")?;
    touch(&dir, "notes.txt")?;
    touch(&dir, "2024/README")?;

    let root = dir.path().canonicalize()?;
    let images = find_images(dir.path())?;
    let expected: Vec<String> = ["2024/trip/c.JPEG", "a.jpg", "b.png"]
        .iter()
        .map(|rel| root.join(rel).to_string_lossy().into_owned())
        .collect();
    pretty_assertions::assert_eq!(images, expected);
    Ok(())
}

#[test]
fn test_directory_without_images() -> Result<()> {
    let dir = TempDir::new()?;
    touch(&dir, "only.txt")?;
    assert!(find_images(dir.path())?.is_empty());
    Ok(())
}

#[test]
fn test_missing_directory_is_an_error() -> Result<()> {
    let dir = TempDir::new()?;
    let err = find_images(&dir.path().join("absent")).unwrap_err();
    assert!(err.to_string().contains("Image directory not found"));
    Ok(())
}

#[test]
fn test_file_root_is_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    touch(&dir, "a.jpg")?;
    let err = find_images(&dir.path().join("a.jpg")).unwrap_err();
    assert!(err.to_string().contains("Not a directory"));
    Ok(())
}
