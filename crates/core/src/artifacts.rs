//! Naming of index artifacts on disk

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const VECTORS_SUFFIX: &str = ".vectors";
pub const TABLE_SUFFIX: &str = ".table.jsonl";
pub const META_SUFFIX: &str = ".meta.json";
pub const JOURNAL_SUFFIX: &str = ".commit.json";

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = prefix.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Prefix of the partial index written by node `node_id`
pub fn worker_prefix(prefix: &Path, node_id: usize) -> PathBuf {
    with_suffix(prefix, &format!("_worker_{node_id}"))
}

/// Journal present only while a merge under `prefix` is being committed
pub fn commit_journal(prefix: &Path) -> PathBuf {
    with_suffix(prefix, JOURNAL_SUFFIX)
}

/// The three files making up one index: vectors, path table and metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub vectors: PathBuf,
    pub table: PathBuf,
    pub meta: PathBuf,
}

impl ArtifactPaths {
    pub fn for_prefix(prefix: &Path) -> Self {
        Self {
            vectors: with_suffix(prefix, VECTORS_SUFFIX),
            table: with_suffix(prefix, TABLE_SUFFIX),
            meta: with_suffix(prefix, META_SUFFIX),
        }
    }

    pub fn for_worker(prefix: &Path, node_id: usize) -> Self {
        Self::for_prefix(&worker_prefix(prefix, node_id))
    }

    /// Staging names used while a merge is being written
    pub fn staging(&self) -> Self {
        Self {
            vectors: with_suffix(&self.vectors, ".tmp"),
            table: with_suffix(&self.table, ".tmp"),
            meta: with_suffix(&self.meta, ".tmp"),
        }
    }

    pub fn all(&self) -> [&Path; 3] {
        [
            self.vectors.as_path(),
            self.table.as_path(),
            self.meta.as_path(),
        ]
    }

    pub fn exists(&self) -> bool {
        self.all().iter().all(|p| p.exists())
    }
}
