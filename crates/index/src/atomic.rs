//! Stage-then-rename file replacement
//!
//! A multi-file commit hard-links every current target to a `.bak` sibling and
//! records the set in a journal before the first rename. A failed rename puts
//! the backups back; a journal found on startup means a commit was cut short
//! and is rolled back by [`recover`].

use fleetindex_core::error::{Error, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

pub(crate) fn staging_path(path: &Path) -> PathBuf {
    with_suffix(path, ".tmp")
}

fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, ".bak")
}

/// Replaces `path` with `bytes` without exposing a partially written file
pub fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let staged = Staged::new(vec![(staging_path(path), path.to_path_buf())]);
    write_staging(&staged.pairs[0].0, bytes)?;
    staged.commit()
}

/// Writes and syncs a staging file
pub(crate) fn write_staging(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file =
        File::create(path).context(format!("Failed to create {}", path.display()))?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct JournalEntry {
    target: PathBuf,
    /// `None` when the target did not exist before the commit
    backup: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Journal {
    entries: Vec<JournalEntry>,
}

fn backup_targets(pairs: &[(PathBuf, PathBuf)]) -> Result<Vec<JournalEntry>> {
    let mut entries = Vec::with_capacity(pairs.len());
    for (_, target) in pairs {
        let backup = if target.exists() {
            let backup = backup_path(target);
            let linked = (|| {
                if backup.exists() {
                    std::fs::remove_file(&backup)?;
                }
                std::fs::hard_link(target, &backup)
                    .or_else(|_| std::fs::copy(target, &backup).map(|_| ()))
            })();
            if let Err(e) = linked {
                discard_backups(&entries);
                return Err(Error::with_context(
                    format!("Failed to back up {}", target.display()),
                    e,
                ));
            }
            Some(backup)
        } else {
            None
        };
        entries.push(JournalEntry {
            target: target.clone(),
            backup,
        });
    }
    Ok(entries)
}

fn write_journal(path: &Path, entries: &[JournalEntry]) -> Result<()> {
    let journal = Journal {
        entries: entries.to_vec(),
    };
    write_file_atomic(path, &serde_json::to_vec_pretty(&journal)?)
}

/// Puts every target back the way it was before the commit started
fn restore(entries: &[JournalEntry]) {
    for entry in entries {
        let outcome = match &entry.backup {
            Some(backup) if backup.exists() => std::fs::rename(backup, &entry.target),
            Some(_) => Ok(()),
            None if entry.target.exists() => std::fs::remove_file(&entry.target),
            None => Ok(()),
        };
        if let Err(e) = outcome {
            error!("Failed to restore {}: {e}", entry.target.display());
        }
    }
}

fn discard_backups(entries: &[JournalEntry]) {
    for backup in entries.iter().filter_map(|e| e.backup.as_ref()) {
        if let Err(e) = std::fs::remove_file(backup) {
            warn!("Failed to remove backup {}: {e}", backup.display());
        }
    }
}

/// Rolls back a commit interrupted before it finished
///
/// Returns `true` when a journal was found and replayed.
pub fn recover(journal: &Path) -> Result<bool> {
    if !journal.exists() {
        return Ok(false);
    }
    let content = std::fs::read(journal)
        .context(format!("Failed to read commit journal {}", journal.display()))?;
    let Journal { entries } = serde_json::from_slice(&content)?;
    warn!(
        "Rolling back interrupted commit of {} files ({})",
        entries.len(),
        journal.display()
    );
    restore(&entries);
    std::fs::remove_file(journal)
        .context(format!("Failed to remove commit journal {}", journal.display()))?;
    Ok(true)
}

/// Files written under staging names, renamed into place together
///
/// Dropping without [`Staged::commit`] removes the staging files and leaves
/// the targets untouched.
pub(crate) struct Staged {
    pairs: Vec<(PathBuf, PathBuf)>,
    journal: Option<PathBuf>,
    committed: bool,
}

impl Staged {
    /// `pairs` are `(staging, target)`, renamed in order on commit
    pub(crate) fn new(pairs: Vec<(PathBuf, PathBuf)>) -> Self {
        Self {
            pairs,
            journal: None,
            committed: false,
        }
    }

    /// Like [`Staged::new`], recording the commit in `journal` so a crash
    /// between renames can be rolled back with [`recover`]
    pub(crate) fn with_journal(pairs: Vec<(PathBuf, PathBuf)>, journal: PathBuf) -> Self {
        Self {
            pairs,
            journal: Some(journal),
            committed: false,
        }
    }

    pub(crate) fn commit(mut self) -> Result<()> {
        if self.pairs.len() == 1 && self.journal.is_none() {
            let (staging, target) = &self.pairs[0];
            std::fs::rename(staging, target)
                .context(format!("Failed to move {} into place", target.display()))?;
            self.committed = true;
            return Ok(());
        }

        let entries = backup_targets(&self.pairs)?;
        if let Some(journal) = &self.journal {
            if let Err(e) = write_journal(journal, &entries) {
                discard_backups(&entries);
                return Err(e);
            }
        }

        for (staging, target) in &self.pairs {
            if let Err(e) = std::fs::rename(staging, target) {
                warn!("Rolling back: {} could not be replaced", target.display());
                self.abort(&entries);
                return Err(Error::with_context(
                    format!("Failed to move {} into place", target.display()),
                    e,
                ));
            }
        }

        if let Some(journal) = &self.journal {
            if let Err(e) = std::fs::remove_file(journal) {
                self.abort(&entries);
                return Err(Error::with_context("Failed to finish commit", e));
            }
        }

        self.committed = true;
        discard_backups(&entries);
        debug!("Committed {} files", self.pairs.len());
        Ok(())
    }

    fn abort(&self, entries: &[JournalEntry]) {
        restore(entries);
        if let Some(journal) = &self.journal {
            if journal.exists() {
                if let Err(e) = std::fs::remove_file(journal) {
                    error!("Failed to remove commit journal {}: {e}", journal.display());
                }
            }
        }
    }
}

impl Drop for Staged {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for (staging, _) in &self.pairs {
            if staging.exists() {
                if let Err(e) = std::fs::remove_file(staging) {
                    warn!("Failed to remove staging file {}: {e}", staging.display());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).expect("read")
    }

    /// Three targets holding "old" with staging files holding "new"
    fn three_files(dir: &TempDir) -> Vec<(PathBuf, PathBuf)> {
        ["index.vectors", "index.table.jsonl", "index.meta.json"]
            .iter()
            .map(|name| {
                let target = dir.path().join(name);
                let staging = staging_path(&target);
                std::fs::write(&target, "old").expect("seed");
                std::fs::write(&staging, "new").expect("stage");
                (staging, target)
            })
            .collect()
    }

    #[test]
    fn test_write_file_atomic_replaces_content() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, "old").expect("seed");

        write_file_atomic(&path, b"new").expect("write");
        assert_eq!(read(&path), "new");
        assert!(!staging_path(&path).exists());
    }

    #[test]
    fn test_uncommitted_stage_is_discarded() {
        let dir = TempDir::new().expect("tempdir");
        let target = dir.path().join("index.meta.json");
        let staging = staging_path(&target);
        std::fs::write(&target, "previous").expect("seed");
        std::fs::write(&staging, "half-written").expect("stage");

        drop(Staged::new(vec![(staging.clone(), target.clone())]));

        assert!(!staging.exists());
        assert_eq!(read(&target), "previous");
    }

    #[test]
    fn test_commit_replaces_all_and_cleans_up() {
        let dir = TempDir::new().expect("tempdir");
        let pairs = three_files(&dir);
        let journal = dir.path().join("index.commit.json");

        Staged::with_journal(pairs.clone(), journal.clone())
            .commit()
            .expect("commit");

        for (staging, target) in &pairs {
            assert_eq!(read(target), "new");
            assert!(!staging.exists());
            assert!(!backup_path(target).exists());
        }
        assert!(!journal.exists());
    }

    #[test]
    fn test_failed_second_rename_restores_every_target() {
        let dir = TempDir::new().expect("tempdir");
        let pairs = three_files(&dir);
        let journal = dir.path().join("index.commit.json");
        std::fs::remove_file(&pairs[1].0).expect("drop second staging file");

        let result = Staged::with_journal(pairs.clone(), journal.clone()).commit();

        assert!(result.is_err());
        for (staging, target) in &pairs {
            assert_eq!(read(target), "old", "{}", target.display());
            assert!(!staging.exists());
            assert!(!backup_path(target).exists());
        }
        assert!(!journal.exists());
    }

    #[test]
    fn test_rollback_removes_targets_that_did_not_exist() {
        let dir = TempDir::new().expect("tempdir");
        let fresh = dir.path().join("fresh.vectors");
        std::fs::write(staging_path(&fresh), "new").expect("stage");
        let missing = dir.path().join("fresh.meta.json");

        let result = Staged::new(vec![
            (staging_path(&fresh), fresh.clone()),
            (staging_path(&missing), missing.clone()),
        ])
        .commit();

        assert!(result.is_err());
        assert!(!fresh.exists());
        assert!(!missing.exists());
    }

    #[test]
    fn test_recover_rolls_back_interrupted_commit() {
        let dir = TempDir::new().expect("tempdir");
        let pairs = three_files(&dir);
        let journal = dir.path().join("index.commit.json");

        // Backups and journal in place, then a crash after the first rename
        let entries = backup_targets(&pairs).expect("backup");
        write_journal(&journal, &entries).expect("journal");
        std::fs::rename(&pairs[0].0, &pairs[0].1).expect("rename");
        assert_eq!(read(&pairs[0].1), "new");

        assert!(recover(&journal).expect("recover"));
        for (_, target) in &pairs {
            assert_eq!(read(target), "old");
        }
        assert!(!journal.exists());
        assert!(!recover(&journal).expect("second recover"));
    }
}
