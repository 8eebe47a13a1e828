//! The merged, globally addressed index

use crate::meta::MergedMeta;
use crate::table::{read_paths, read_rows};
use crate::vectors::{read_vectors, VectorSet};
use fleetindex_core::artifacts::ArtifactPaths;
use fleetindex_core::error::{Error, Result};
use std::path::Path;

/// Merged index loaded from disk; global id `i` is row `i` of both files
#[derive(Debug, Clone, PartialEq)]
pub struct MergedIndex {
    pub meta: MergedMeta,
    pub paths: Vec<String>,
    pub vectors: VectorSet,
}

impl MergedIndex {
    /// Loads the merged index at `prefix`, or `None` if it has not been built
    pub fn load(prefix: &Path) -> Result<Option<Self>> {
        let files = ArtifactPaths::for_prefix(prefix);
        if !files.meta.exists() {
            return Ok(None);
        }

        let meta = MergedMeta::load(&files.meta)?;
        let vectors = read_vectors(&files.vectors)?;
        let paths = read_paths(&files.table)?;
        if paths.len() != vectors.len() || paths.len() != meta.num_images {
            return Err(Error::merge(format!(
                "Merged index at {} is inconsistent: {} paths, {} vectors, metadata says {}",
                prefix.display(),
                paths.len(),
                vectors.len(),
                meta.num_images
            )));
        }

        Ok(Some(Self {
            meta,
            paths,
            vectors,
        }))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Path stored under a global id
    pub fn path(&self, id: usize) -> Option<&str> {
        self.paths.get(id).map(String::as_str)
    }
}

/// Id to path lookup without loading vectors
#[derive(Debug, Clone)]
pub struct PathTable {
    pub meta: MergedMeta,
    paths: Vec<String>,
}

impl PathTable {
    /// Loads metadata and paths of the merged index at `prefix`
    pub fn load(prefix: &Path) -> Result<Option<Self>> {
        let files = ArtifactPaths::for_prefix(prefix);
        if !files.meta.exists() {
            return Ok(None);
        }
        Ok(Some(Self {
            meta: MergedMeta::load(&files.meta)?,
            paths: read_paths(&files.table)?,
        }))
    }

    pub fn resolve(&self, id: usize) -> Option<&str> {
        self.paths.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Checks that the table's stored embeddings agree with the vector file
pub fn verify(prefix: &Path) -> Result<usize> {
    let files = ArtifactPaths::for_prefix(prefix);
    let vectors = read_vectors(&files.vectors)?;
    let rows = read_rows(&files.table)?;
    if rows.len() != vectors.len() {
        return Err(Error::merge(format!(
            "{} table rows but {} vectors",
            rows.len(),
            vectors.len()
        )));
    }
    for (row, vector) in rows.iter().zip(vectors.rows()) {
        if row.embedding.as_slice() != vector {
            return Err(Error::merge(format!(
                "Embedding for id {} ({}) differs from the vector file",
                row.id, row.path
            )));
        }
    }
    Ok(rows.len())
}
