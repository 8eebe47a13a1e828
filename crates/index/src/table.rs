//! Path table stored as JSON lines
//!
//! Each line holds one entry: its id within the index, the source path and
//! the embedding. Ids are contiguous from zero in file order.

use crate::error::FormatError;
use fleetindex_core::error::{Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// One row of the path table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub id: usize,
    pub path: String,
    pub embedding: Vec<f32>,
}

/// Row view without the embedding, for id lookups
#[derive(Debug, Deserialize)]
struct PathOnly {
    id: usize,
    path: String,
}

/// Streams rows to a JSONL file
pub struct TableWriter {
    writer: BufWriter<File>,
    rows: usize,
}

impl TableWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).context(format!("Failed to create {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            rows: 0,
        })
    }

    pub fn write_row(&mut self, id: usize, path: &str, embedding: &[f32]) -> Result<()> {
        #[derive(Serialize)]
        struct RowRef<'a> {
            id: usize,
            path: &'a str,
            embedding: &'a [f32],
        }
        serde_json::to_writer(&mut self.writer, &RowRef { id, path, embedding })?;
        self.writer.write_all(b"\n")?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes and syncs the file, returning the row count
    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.rows)
    }
}

fn for_each_line<T, F>(path: &Path, mut f: F) -> Result<()>
where
    T: for<'de> Deserialize<'de>,
    F: FnMut(usize, T) -> Result<()>,
{
    let file = File::open(path).context(format!("Failed to open {}", path.display()))?;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: T = serde_json::from_str(&line).map_err(|e| FormatError::BadTableRow {
            path: path.display().to_string(),
            line: idx + 1,
            message: e.to_string(),
        })?;
        f(idx + 1, row)?;
    }
    Ok(())
}

fn check_id(path: &Path, line: usize, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(FormatError::BadTableRow {
            path: path.display().to_string(),
            line,
            message: format!("expected id {expected}, found {actual}"),
        }
        .into());
    }
    Ok(())
}

/// Reads every row, embeddings included
pub fn read_rows(path: &Path) -> Result<Vec<TableRow>> {
    let mut rows = Vec::new();
    for_each_line(path, |line, row: TableRow| {
        check_id(path, line, rows.len(), row.id)?;
        rows.push(row);
        Ok(())
    })?;
    Ok(rows)
}

/// Reads the id-ordered path list, skipping embeddings
pub fn read_paths(path: &Path) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    for_each_line(path, |line, row: PathOnly| {
        check_id(path, line, paths.len(), row.id)?;
        paths.push(row.path);
        Ok(())
    })?;
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rows_and_paths() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("t.table.jsonl");

        let mut writer = TableWriter::create(&path).expect("create");
        writer.write_row(0, "/img/a.jpg", &[0.5, 0.5]).expect("row");
        writer.write_row(1, "/img/b.jpg", &[1.0, 0.0]).expect("row");
        assert_eq!(writer.finish().expect("finish"), 2);

        let rows = read_rows(&path).expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].path, "/img/b.jpg");
        assert_eq!(rows[1].embedding, vec![1.0, 0.0]);

        assert_eq!(
            read_paths(&path).expect("paths"),
            vec!["/img/a.jpg".to_string(), "/img/b.jpg".to_string()]
        );
    }

    #[test]
    fn test_out_of_order_ids_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("t.table.jsonl");
        std::fs::write(
            &path,
            "{\"id\":0,\"path\":\"/a\",\"embedding\":[]}\n{\"id\":5,\"path\":\"/b\",\"embedding\":[]}\n",
        )
        .expect("write");

        let err = read_paths(&path).unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(err.to_string().contains("expected id 1"));
    }

    #[test]
    fn test_malformed_line_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("t.table.jsonl");
        std::fs::write(&path, "not json\n").expect("write");
        assert!(read_rows(&path).is_err());
    }
}
