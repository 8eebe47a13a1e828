//! Durable record of already indexed paths

use crate::atomic::write_file_atomic;
use chrono::{DateTime, Utc};
use fleetindex_core::error::{Result, ResultExt};
use fleetindex_core::WorkItem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const STATE_VERSION: &str = "1.0";
const INDEXED_STATUS: &str = "indexed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedEntry {
    pub indexed_at: DateTime<Utc>,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    INDEXED_STATUS.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateFile {
    version: String,
    #[serde(default)]
    indexed_images: BTreeMap<String, IndexedEntry>,
    #[serde(default)]
    total_images: usize,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            indexed_images: BTreeMap::new(),
            total_images: 0,
            last_updated: None,
        }
    }
}

/// The set of paths whose embeddings are in the merged index
///
/// Entries are only ever added; the file is rewritten atomically on save.
#[derive(Debug, Clone)]
pub struct IndexedSet {
    path: PathBuf,
    state: StateFile,
}

impl IndexedSet {
    /// Loads the state file, starting empty when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        let state = if path.exists() {
            let content = std::fs::read_to_string(path)
                .context(format!("Failed to read state file {}", path.display()))?;
            let state: StateFile = serde_json::from_str(&content)?;
            info!(
                "Loaded {} indexed paths from {}",
                state.indexed_images.len(),
                path.display()
            );
            state
        } else {
            debug!("No state file at {}, starting empty", path.display());
            StateFile::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            state,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, path: &str) -> bool {
        self.state.indexed_images.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&IndexedEntry> {
        self.state.indexed_images.get(path)
    }

    pub fn len(&self) -> usize {
        self.state.indexed_images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.indexed_images.is_empty()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.state.last_updated
    }

    /// Splits `items` into `(new, already_indexed)`, preserving order
    pub fn split_new(&self, items: Vec<WorkItem>) -> (Vec<WorkItem>, Vec<WorkItem>) {
        items
            .into_iter()
            .partition(|item| !self.contains(item.as_str()))
    }

    /// Records `items` as indexed at `now`
    pub fn mark_indexed(&mut self, items: &[WorkItem], now: DateTime<Utc>) {
        for item in items {
            self.state.indexed_images.insert(
                item.as_str().to_string(),
                IndexedEntry {
                    indexed_at: now,
                    status: INDEXED_STATUS.to_string(),
                },
            );
        }
        self.state.total_images = self.state.indexed_images.len();
        self.state.last_updated = Some(now);
    }

    /// Serialized state file contents
    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.state)?)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        write_file_atomic(&self.path, &self.to_bytes()?)
    }
}
