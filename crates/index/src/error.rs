use fleetindex_core::Error as CoreError;
use thiserror::Error;

/// Errors reading index artifacts from disk
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("{path}: not a vector file (bad magic)")]
    BadMagic { path: String },

    #[error("{path}: unsupported vector file version {version}")]
    UnsupportedVersion { path: String, version: u32 },

    #[error("{path}: expected {expected} bytes of vector data, found {actual}")]
    Truncated {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("{path}: line {line}: {message}")]
    BadTableRow {
        path: String,
        line: usize,
        message: String,
    },

    #[error("{source_name}: {what} disagree ({left} vs {right})")]
    CountMismatch {
        source_name: String,
        what: &'static str,
        left: usize,
        right: usize,
    },
}

impl From<FormatError> for CoreError {
    fn from(err: FormatError) -> Self {
        CoreError::merge(err.to_string())
    }
}
