//! Flat vector file codec
//!
//! Layout (all little-endian):
//!
//! ```text
//! magic    [u8; 4]  "FIVX"
//! version  u32      1
//! dim      u32
//! count    u64
//! data     f32 * dim * count, row-major
//! ```

use crate::error::FormatError;
use fleetindex_core::error::{Error, Result, ResultExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 4] = b"FIVX";
const VERSION: u32 = 1;
const HEADER_LEN: u64 = 4 + 4 + 4 + 8;

/// A dense matrix of `count` vectors of `dim` floats
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorSet {
    dim: usize,
    data: Vec<f32>,
}

impl VectorSet {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    /// Builds a set from row-major data; `data.len()` must be a multiple of `dim`
    pub fn from_flat(dim: usize, data: Vec<f32>) -> Result<Self> {
        if dim == 0 || data.len() % dim != 0 {
            return Err(Error::invalid_input(format!(
                "{} floats do not form vectors of dimension {dim}",
                data.len()
            )));
        }
        Ok(Self { dim, data })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize) -> Option<&[f32]> {
        let start = row.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    pub fn push(&mut self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::dimension_mismatch(self.dim, vector.len(), "vector"));
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    /// Appends all rows of `other`
    pub fn extend(&mut self, other: &VectorSet) -> Result<()> {
        if other.dim != self.dim {
            return Err(Error::dimension_mismatch(self.dim, other.dim, "vector set"));
        }
        self.data.extend_from_slice(&other.data);
        Ok(())
    }

    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim.max(1))
    }
}

/// Header of a vector file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorHeader {
    pub dim: usize,
    pub count: usize,
}

pub fn write_vectors(path: &Path, vectors: &VectorSet) -> Result<()> {
    let file = File::create(path).context(format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    let dim = u32::try_from(vectors.dim())
        .map_err(|_| Error::invalid_input(format!("dimension {} too large", vectors.dim())))?;
    writer.write_all(&dim.to_le_bytes())?;
    writer.write_all(&(vectors.len() as u64).to_le_bytes())?;
    for value in vectors.as_flat() {
        writer.write_all(&value.to_le_bytes())?;
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn read_header_from(reader: &mut impl Read, path: &Path) -> Result<VectorHeader> {
    let display = path.display().to_string();
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(FormatError::BadMagic { path: display }.into());
    }

    let mut word = [0u8; 4];
    reader.read_exact(&mut word)?;
    let version = u32::from_le_bytes(word);
    if version != VERSION {
        return Err(FormatError::UnsupportedVersion {
            path: display,
            version,
        }
        .into());
    }

    reader.read_exact(&mut word)?;
    let dim = u32::from_le_bytes(word) as usize;
    let mut long = [0u8; 8];
    reader.read_exact(&mut long)?;
    let count = u64::from_le_bytes(long) as usize;
    Ok(VectorHeader { dim, count })
}

/// Reads only the header
pub fn read_header(path: &Path) -> Result<VectorHeader> {
    let file = File::open(path).context(format!("Failed to open {}", path.display()))?;
    read_header_from(&mut BufReader::new(file), path)
}

pub fn read_vectors(path: &Path) -> Result<VectorSet> {
    let file = File::open(path).context(format!("Failed to open {}", path.display()))?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let header = read_header_from(&mut reader, path)?;

    let expected = (header.dim as u64)
        .saturating_mul(header.count as u64)
        .saturating_mul(4);
    let actual = file_len.saturating_sub(HEADER_LEN);
    if actual != expected {
        return Err(FormatError::Truncated {
            path: path.display().to_string(),
            expected,
            actual,
        }
        .into());
    }

    let mut bytes = Vec::with_capacity(expected as usize);
    reader.read_to_end(&mut bytes)?;
    let data = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    if header.dim == 0 {
        return Ok(VectorSet::new(0));
    }
    VectorSet::from_flat(header.dim, data)
}
