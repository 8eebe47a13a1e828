//! Partial indexes written by individual nodes

use crate::error::FormatError;
use crate::meta::PartialMeta;
use crate::table::{read_paths, TableWriter};
use crate::vectors::{read_vectors, write_vectors, VectorSet};
use fleetindex_core::artifacts::ArtifactPaths;
use fleetindex_core::error::{Error, Result};
use std::path::Path;

/// One node's output: metadata, ordered paths and their vectors
#[derive(Debug, Clone, PartialEq)]
pub struct PartialIndex {
    pub node_id: usize,
    pub meta: PartialMeta,
    pub paths: Vec<String>,
    pub vectors: VectorSet,
}

impl PartialIndex {
    /// Name used in errors and the offset table
    pub fn source_name(&self) -> String {
        format!("worker_{}", self.node_id)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Loads the partial for `node_id` under `prefix` and checks it is self-consistent
    pub fn load(prefix: &Path, node_id: usize) -> Result<Self> {
        let files = ArtifactPaths::for_worker(prefix, node_id);
        let source_name = format!("worker_{node_id}");

        let meta = PartialMeta::load(&files.meta)?;
        let paths = read_paths(&files.table)?;
        let vectors = read_vectors(&files.vectors)?;

        if !vectors.is_empty() && vectors.dim() != meta.embedding_dim {
            return Err(Error::dimension_mismatch(
                meta.embedding_dim,
                vectors.dim(),
                source_name,
            ));
        }
        if paths.len() != vectors.len() {
            return Err(FormatError::CountMismatch {
                source_name,
                what: "paths and vectors",
                left: paths.len(),
                right: vectors.len(),
            }
            .into());
        }
        if meta.num_images != paths.len() {
            return Err(FormatError::CountMismatch {
                source_name,
                what: "metadata and table",
                left: meta.num_images,
                right: paths.len(),
            }
            .into());
        }

        Ok(Self {
            node_id,
            meta,
            paths,
            vectors,
        })
    }

    /// Writes the partial in the layout nodes produce
    pub fn write(&self, prefix: &Path) -> Result<()> {
        let files = ArtifactPaths::for_worker(prefix, self.node_id);
        write_vectors(&files.vectors, &self.vectors)?;

        let mut table = TableWriter::create(&files.table)?;
        for (id, (path, vector)) in self.paths.iter().zip(self.vectors.rows()).enumerate() {
            table.write_row(id, path, vector)?;
        }
        table.finish()?;

        self.meta.save(&files.meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(node_id: usize, dim: usize, n: usize) -> PartialIndex {
        let paths: Vec<String> = (0..n).map(|i| format!("/img/{node_id}/{i}.jpg")).collect();
        let data = (0..n * dim).map(|v| v as f32).collect();
        PartialIndex {
            node_id,
            meta: PartialMeta {
                worker_id: node_id,
                model_name: "clip-ViT-B-32".to_string(),
                embedding_dim: dim,
                num_images: n,
                num_failed: 0,
                processing_time_seconds: Some(1.0),
                batch_size: Some(4),
            },
            paths,
            vectors: VectorSet::from_flat(dim, data).expect("vectors"),
        }
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().expect("tempdir");
        let prefix = dir.path().join("job");
        let partial = sample(1, 4, 3);
        partial.write(&prefix).expect("write");

        assert!(dir.path().join("job_worker_1.vectors").exists());
        let loaded = PartialIndex::load(&prefix, 1).expect("load");
        assert_eq!(loaded, partial);
    }

    #[test]
    fn test_meta_count_must_match_table() {
        let dir = TempDir::new().expect("tempdir");
        let prefix = dir.path().join("job");
        let mut partial = sample(0, 2, 2);
        partial.meta.num_images = 5;
        partial.write(&prefix).expect("write");

        let err = PartialIndex::load(&prefix, 0).unwrap_err();
        assert!(err.to_string().contains("metadata and table"));
    }

    #[test]
    fn test_missing_partial_is_error() {
        let dir = TempDir::new().expect("tempdir");
        assert!(PartialIndex::load(&dir.path().join("nothing"), 0).is_err());
    }
}
