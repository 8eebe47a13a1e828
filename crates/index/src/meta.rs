//! JSON metadata sidecars for partial and merged indexes

use chrono::{DateTime, Utc};
use fleetindex_core::error::{Result, ResultExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Metadata a node writes next to its partial index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialMeta {
    pub worker_id: usize,
    pub model_name: String,
    pub embedding_dim: usize,
    pub num_images: usize,
    #[serde(default)]
    pub num_failed: usize,
    #[serde(default)]
    pub processing_time_seconds: Option<f64>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

/// Contiguous range of global ids contributed by one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// `"existing"` for entries carried over, otherwise `worker_<id>`
    pub source: String,
    pub base: usize,
    pub count: usize,
}

impl Segment {
    pub fn contains(&self, id: usize) -> bool {
        id >= self.base && id < self.base + self.count
    }
}

/// Metadata of the merged index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedMeta {
    pub model_name: String,
    pub embedding_dim: usize,
    pub num_images: usize,
    pub num_failed: usize,
    pub built_at: DateTime<Utc>,
    /// Offset table of the most recent merge
    #[serde(default)]
    pub segments: Vec<Segment>,
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
    Ok(serde_json::from_str(&content)?)
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content).context(format!("Failed to write {}", path.display()))
}

impl PartialMeta {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

impl MergedMeta {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}
