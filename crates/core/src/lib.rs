//! Core types for the fleetindex distributed embedding system
//!
//! This crate provides the foundational pieces shared by every other crate:
//!
//! - **Work**: work items, node descriptions, chunks and path mapping
//! - **Jobs**: the job lifecycle and its progress counters
//! - **Artifacts**: naming of merged and per-node index files
//! - **Configuration**: system configuration management
//! - **Error handling**: unified error types
//!
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod artifacts;
pub mod config;
pub mod error;
pub mod job;
pub mod work;

// Re-export main types for convenience
pub use artifacts::ArtifactPaths;
pub use config::{
    Config, DispatchConfig, IndexConfig, MonitorConfig, NodeConfig, QueryConfig, RemoteConfig,
    ServerConfig,
};
pub use error::{AuthFailure, Error, Result, ResultExt};
pub use job::{Job, JobIdGenerator, JobProgress, JobStatus, NO_JOB_ID};
pub use work::{dedup_items, is_image_path, Chunk, NodeSpec, PathMapping, WorkItem};

/// Version of the core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Result, ResultExt};
    pub use crate::job::{Job, JobStatus};
    pub use crate::work::{Chunk, NodeSpec, WorkItem};
}
