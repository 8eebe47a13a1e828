//! Index statistics reported to clients

use crate::meta::MergedMeta;
use chrono::{DateTime, Utc};
use fleetindex_core::artifacts::ArtifactPaths;
use fleetindex_core::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct IndexStats {
    pub model_name: String,
    pub embedding_dim: usize,
    pub total_images: usize,
    pub num_failed: usize,
    /// RFC 3339 timestamp, or `"never"`
    pub last_updated: String,
    pub index_size_mb: f64,
}

impl IndexStats {
    /// Reads metadata under `prefix`, falling back to the configured model when
    /// nothing has been merged yet
    pub fn collect(
        prefix: &Path,
        last_updated: Option<DateTime<Utc>>,
        fallback_model: &str,
        fallback_dim: usize,
    ) -> Result<Self> {
        let files = ArtifactPaths::for_prefix(prefix);
        let (model_name, embedding_dim, total_images, num_failed) = if files.meta.exists() {
            let meta = MergedMeta::load(&files.meta)?;
            (
                meta.model_name,
                meta.embedding_dim,
                meta.num_images,
                meta.num_failed,
            )
        } else {
            (fallback_model.to_string(), fallback_dim, 0, 0)
        };

        let size: u64 = [&files.vectors, &files.table]
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();

        Ok(Self {
            model_name,
            embedding_dim,
            total_images,
            num_failed,
            last_updated: last_updated
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string()),
            index_size_mb: (size as f64 / BYTES_PER_MB * 100.0).round() / 100.0,
        })
    }
}

/// True when a merged index exists at `prefix`
pub fn index_available(prefix: &Path) -> bool {
    ArtifactPaths::for_prefix(prefix).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fallback_without_index() {
        let dir = TempDir::new().expect("tempdir");
        let stats =
            IndexStats::collect(&dir.path().join("imageindex"), None, "clip-ViT-L-14", 768)
                .expect("stats");
        assert_eq!(
            stats,
            IndexStats {
                model_name: "clip-ViT-L-14".to_string(),
                embedding_dim: 768,
                total_images: 0,
                num_failed: 0,
                last_updated: "never".to_string(),
                index_size_mb: 0.0,
            }
        );
        assert!(!index_available(&dir.path().join("imageindex")));
    }

    #[test]
    fn test_size_is_rounded_megabytes() {
        let dir = TempDir::new().expect("tempdir");
        let prefix = dir.path().join("imageindex");
        let files = ArtifactPaths::for_prefix(&prefix);
        std::fs::write(&files.vectors, vec![0u8; 1024 * 1024]).expect("vectors");
        std::fs::write(&files.table, vec![0u8; 512 * 1024]).expect("table");

        let stats = IndexStats::collect(&prefix, None, "m", 4).expect("stats");
        assert_eq!(stats.index_size_mb, 1.5);
    }
}
