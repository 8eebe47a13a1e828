//! On-disk index artifacts for fleetindex
//!
//! Everything here is synchronous file I/O; async callers should run it on a
//! blocking thread.
//!
//! - [`vectors`]: flat little-endian vector files
//! - [`table`]: JSON lines path tables
//! - [`PartialIndex`] / [`MergedIndex`]: per-node and global indexes
//! - [`Merger`]: all-or-nothing merge with an explicit offset table
//! - [`IndexedSet`]: durable record of indexed paths
//! - [`IndexStats`]: statistics for clients

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

mod atomic;
pub mod error;
mod merge;
mod merged;
pub mod meta;
mod partial;
mod state;
mod stats;
pub mod table;
pub mod vectors;

pub use atomic::write_file_atomic;
pub use error::FormatError;
pub use merge::{
    offset_table, recover_interrupted_merge, MergeReport, Merger, EXISTING_SEGMENT,
};
pub use merged::{verify, MergedIndex, PathTable};
pub use meta::{MergedMeta, PartialMeta, Segment};
pub use partial::PartialIndex;
pub use state::{IndexedEntry, IndexedSet};
pub use stats::{index_available, IndexStats};
pub use vectors::VectorSet;
