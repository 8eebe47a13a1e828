//! Merging partial indexes into the global index
//!
//! Global ids are handed out by an explicit offset table: entries already in
//! the merged index keep their ids, then each partial follows in the order
//! given (node declaration order). Nothing under the merged prefix changes
//! until every new file has been written in full, and the IndexedSet passed
//! along is replaced in the same commit.

use crate::atomic::{recover, staging_path, write_staging, Staged};
use crate::merged::MergedIndex;
use crate::meta::{MergedMeta, Segment};
use crate::partial::PartialIndex;
use crate::state::IndexedSet;
use crate::table::TableWriter;
use crate::vectors::{write_vectors, VectorSet};
use chrono::Utc;
use fleetindex_core::artifacts::{commit_journal, ArtifactPaths};
use fleetindex_core::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Source name of the carried-over segment
pub const EXISTING_SEGMENT: &str = "existing";

/// Outcome of a successful merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub segments: Vec<Segment>,
    /// Entries in the merged index after the merge
    pub total: usize,
    /// Entries contributed by the merged partials
    pub added: usize,
    /// Images the merged partials could not embed
    pub failed: usize,
}

/// Assigns base offsets: `existing` entries first, then each partial in order
pub fn offset_table(existing: usize, partials: &[PartialIndex]) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(partials.len() + 1);
    let mut base = 0;
    if existing > 0 {
        segments.push(Segment {
            source: EXISTING_SEGMENT.to_string(),
            base,
            count: existing,
        });
        base = existing;
    }
    for partial in partials {
        segments.push(Segment {
            source: partial.source_name(),
            base,
            count: partial.len(),
        });
        base += partial.len();
    }
    segments
}

/// Rolls back a merge commit under `prefix` that was cut short
///
/// Returns `true` when the merged index and state file were restored.
pub fn recover_interrupted_merge(prefix: &Path) -> Result<bool> {
    recover(&commit_journal(prefix))
}

/// Writes merged indexes under a fixed prefix
#[derive(Debug, Clone)]
pub struct Merger {
    prefix: PathBuf,
    model_name: String,
    embedding_dim: usize,
}

impl Merger {
    pub fn new(
        prefix: impl Into<PathBuf>,
        model_name: impl Into<String>,
        embedding_dim: usize,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            model_name: model_name.into(),
            embedding_dim,
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Loads the partials for `node_ids` under `partial_prefix` and merges them
    pub fn merge_from(
        &self,
        partial_prefix: &Path,
        node_ids: &[usize],
        indexed: Option<&IndexedSet>,
    ) -> Result<MergeReport> {
        let partials = node_ids
            .iter()
            .map(|&id| PartialIndex::load(partial_prefix, id))
            .collect::<Result<Vec<_>>>()?;
        self.merge_recording(&partials, indexed)
    }

    /// Appends `partials` to the merged index
    pub fn merge(&self, partials: &[PartialIndex]) -> Result<MergeReport> {
        self.merge_recording(partials, None)
    }

    /// Appends `partials` and, in the same commit, replaces the state file
    /// with `indexed`
    ///
    /// Fails with `DimensionMismatch` before writing anything when a partial
    /// or the existing index disagrees with the configured dimension. On any
    /// error both the merged index and the state file are left as they were.
    pub fn merge_recording(
        &self,
        partials: &[PartialIndex],
        indexed: Option<&IndexedSet>,
    ) -> Result<MergeReport> {
        if partials.is_empty() {
            return Err(Error::merge("No partial indexes to merge"));
        }

        for partial in partials {
            if partial.meta.embedding_dim != self.embedding_dim {
                return Err(Error::dimension_mismatch(
                    self.embedding_dim,
                    partial.meta.embedding_dim,
                    partial.source_name(),
                ));
            }
            if !partial.vectors.is_empty() && partial.vectors.dim() != self.embedding_dim {
                return Err(Error::dimension_mismatch(
                    self.embedding_dim,
                    partial.vectors.dim(),
                    partial.source_name(),
                ));
            }
            if partial.meta.model_name != self.model_name {
                warn!(
                    "{} was built with {} (configured model is {})",
                    partial.source_name(),
                    partial.meta.model_name,
                    self.model_name
                );
            }
        }

        recover_interrupted_merge(&self.prefix)?;
        let existing = MergedIndex::load(&self.prefix)?;
        if let Some(current) = &existing {
            if current.meta.embedding_dim != self.embedding_dim {
                return Err(Error::dimension_mismatch(
                    self.embedding_dim,
                    current.meta.embedding_dim,
                    "merged index",
                ));
            }
            if current.meta.model_name != self.model_name {
                return Err(Error::merge(format!(
                    "Merged index was built with {} but {} is configured",
                    current.meta.model_name, self.model_name
                )));
            }
        }

        let existing_count = existing.as_ref().map_or(0, MergedIndex::len);
        let segments = offset_table(existing_count, partials);
        let added: usize = partials.iter().map(PartialIndex::len).sum();
        let total = existing_count + added;
        let failed: usize = partials.iter().map(|p| p.meta.num_failed).sum();

        let meta = MergedMeta {
            model_name: self.model_name.clone(),
            embedding_dim: self.embedding_dim,
            num_images: total,
            num_failed: existing.as_ref().map_or(0, |m| m.meta.num_failed) + failed,
            built_at: Utc::now(),
            segments: segments.clone(),
        };

        self.write(existing.as_ref(), partials, &meta, indexed)
            .map_err(|e| match e {
                Error::DimensionMismatch { .. } | Error::Merge(_) => e,
                other => Error::merge(format!("Failed to write merged index: {other}")),
            })?;

        info!(
            "Merged {} partial indexes into {} ({added} new, {total} total)",
            partials.len(),
            self.prefix.display()
        );

        Ok(MergeReport {
            segments,
            total,
            added,
            failed,
        })
    }

    fn write(
        &self,
        existing: Option<&MergedIndex>,
        partials: &[PartialIndex],
        meta: &MergedMeta,
        indexed: Option<&IndexedSet>,
    ) -> Result<()> {
        if let Some(parent) = self.prefix.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let target = ArtifactPaths::for_prefix(&self.prefix);
        let staging = target.staging();
        let mut pairs = vec![
            (staging.vectors.clone(), target.vectors.clone()),
            (staging.table.clone(), target.table.clone()),
        ];
        if let Some(indexed) = indexed {
            let state = indexed.path();
            if let Some(parent) = state.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            pairs.push((staging_path(state), state.to_path_buf()));
        }
        // Metadata goes last so a reader never sees it ahead of its data
        pairs.push((staging.meta.clone(), target.meta.clone()));
        let staged = Staged::with_journal(pairs, commit_journal(&self.prefix));

        let mut vectors = VectorSet::new(self.embedding_dim);
        let mut table = TableWriter::create(&staging.table)?;
        let mut id = 0;

        let sources = existing
            .map(|m| (&m.paths, &m.vectors))
            .into_iter()
            .chain(partials.iter().map(|p| (&p.paths, &p.vectors)));
        for (paths, set) in sources {
            for (path, vector) in paths.iter().zip(set.rows()) {
                vectors.push(vector)?;
                table.write_row(id, path, vector)?;
                id += 1;
            }
        }
        table.finish()?;

        if id != meta.num_images {
            return Err(Error::merge(format!(
                "Wrote {id} entries but expected {}",
                meta.num_images
            )));
        }

        write_vectors(&staging.vectors, &vectors)?;
        if let Some(indexed) = indexed {
            write_staging(&staging_path(indexed.path()), &indexed.to_bytes()?)?;
        }
        meta.save(&staging.meta)?;
        staged.commit()
    }
}
