//! Work items, node descriptions and chunk assignment types

use crate::config::{Config, RemoteConfig};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// File extensions recognized as images during discovery
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "webp", "tiff"];

/// Returns true when the path has one of [`IMAGE_EXTENSIONS`] (case-insensitive)
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// An absolute source-file path, the unit of embedding work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItem(String);

impl WorkItem {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkItem {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for WorkItem {
    fn from(path: String) -> Self {
        Self(path)
    }
}

/// Collapses repeated paths, keeping the first occurrence of each
pub fn dedup_items<I, S>(paths: I) -> Vec<WorkItem>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .map(Into::into)
        .filter(|p: &String| seen.insert(p.clone()))
        .map(WorkItem)
        .collect()
}

/// A compute node as seen by the partitioner and dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    /// Ordinal in declaration order, used in artifact names
    pub id: usize,
    pub hostname: String,
    pub weight: Option<f64>,
    pub batch_size: usize,
    pub model: String,
}

impl NodeSpec {
    /// Builds the node list from configuration, preserving declaration order
    pub fn from_config(config: &Config) -> Vec<NodeSpec> {
        config
            .nodes
            .iter()
            .enumerate()
            .map(|(id, node)| NodeSpec {
                id,
                hostname: node.hostname.clone(),
                weight: node.weight,
                batch_size: node.batch_size,
                model: node.model_or(&config.index.model_name).to_string(),
            })
            .collect()
    }

    /// Weight, or a `Config` error naming the node when it is unusable
    pub fn require_weight(&self) -> Result<f64> {
        match self.weight {
            Some(w) if w.is_finite() && w >= 0.0 => Ok(w),
            Some(w) => Err(Error::config(format!(
                "Node '{}' has an invalid weight: {w}",
                self.hostname
            ))),
            None => Err(Error::config(format!(
                "Node '{}' has no weight entry",
                self.hostname
            ))),
        }
    }
}

/// The contiguous slice of work assigned to one node
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub node: NodeSpec,
    pub items: Vec<WorkItem>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Translates paths between the orchestrator's filesystem and the nodes'
///
/// Without both roots configured, paths pass through unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathMapping {
    local_root: Option<PathBuf>,
    remote_root: Option<String>,
}

impl PathMapping {
    pub fn new(local_root: Option<PathBuf>, remote_root: Option<String>) -> Self {
        Self {
            local_root,
            remote_root,
        }
    }

    pub fn from_remote_config(remote: &RemoteConfig) -> Self {
        Self::new(remote.local_root.clone(), remote.remote_root.clone())
    }

    /// Local path as seen by a node
    pub fn to_remote(&self, local: &str) -> String {
        let (Some(local_root), Some(remote_root)) = (&self.local_root, &self.remote_root) else {
            return local.to_string();
        };
        match Path::new(local).strip_prefix(local_root) {
            Ok(rest) if rest.as_os_str().is_empty() => remote_root.clone(),
            Ok(rest) => format!(
                "{}/{}",
                remote_root.trim_end_matches('/'),
                rest.to_string_lossy()
            ),
            Err(_) => local.to_string(),
        }
    }

    /// Node path as seen locally
    pub fn to_local(&self, remote: &str) -> String {
        let (Some(local_root), Some(remote_root)) = (&self.local_root, &self.remote_root) else {
            return remote.to_string();
        };
        let root = remote_root.trim_end_matches('/');
        match remote.strip_prefix(root) {
            Some("") => local_root.to_string_lossy().into_owned(),
            Some(rest) if rest.starts_with('/') => local_root
                .join(rest.trim_start_matches('/'))
                .to_string_lossy()
                .into_owned(),
            _ => remote.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_is_image_path() {
        assert!(is_image_path(Path::new("/a/b/photo.JPG")));
        assert!(is_image_path(Path::new("scan.tiff")));
        assert!(!is_image_path(Path::new("notes.txt")));
        assert!(!is_image_path(Path::new("no_extension")));
    }

    #[test]
    fn test_dedup_items_keeps_first_occurrence() {
        let items = dedup_items(vec!["/x/1.jpg", "/x/2.jpg", "/x/1.jpg", "/x/3.jpg"]);
        assert_eq!(
            items,
            vec![
                WorkItem::from("/x/1.jpg"),
                WorkItem::from("/x/2.jpg"),
                WorkItem::from("/x/3.jpg"),
            ]
        );
    }

    #[test]
    fn test_require_weight() {
        let mut node = NodeSpec {
            id: 0,
            hostname: "node-a".to_string(),
            weight: Some(0.5),
            batch_size: 4,
            model: "m".to_string(),
        };
        assert_eq!(node.require_weight().ok(), Some(0.5));

        node.weight = None;
        let err = node.require_weight().unwrap_err();
        assert!(err.to_string().contains("node-a"));

        node.weight = Some(f64::INFINITY);
        assert!(node.require_weight().is_err());
    }

    #[test]
    fn test_path_mapping_round_trip() {
        let mapping = PathMapping::new(
            Some(PathBuf::from("/Volumes/images")),
            Some("/mnt/images/".to_string()),
        );
        assert_eq!(
            mapping.to_remote("/Volumes/images/2024/cat.png"),
            "/mnt/images/2024/cat.png"
        );
        assert_eq!(
            mapping.to_local("/mnt/images/2024/cat.png"),
            "/Volumes/images/2024/cat.png"
        );
    }

    #[test]
    fn test_path_mapping_passthrough() {
        let mapping = PathMapping::new(
            Some(PathBuf::from("/Volumes/images")),
            Some("/mnt/images".to_string()),
        );
        assert_eq!(mapping.to_remote("/elsewhere/a.jpg"), "/elsewhere/a.jpg");
        assert_eq!(mapping.to_local("/mnt/imagesX/a.jpg"), "/mnt/imagesX/a.jpg");

        let identity = PathMapping::default();
        assert_eq!(identity.to_remote("/a/b.jpg"), "/a/b.jpg");
        assert_eq!(identity.to_local("/a/b.jpg"), "/a/b.jpg");
    }
}
