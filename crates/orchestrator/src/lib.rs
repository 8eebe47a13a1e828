//! Distributed build-and-merge orchestration
//!
//! A submitted job is split across the node pool by weight, each chunk is run
//! by a worker on its node, and once every worker has succeeded their partial
//! indexes are merged into the global index. Job records live in a tracker
//! actor that clients query for progress.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod dispatch;
pub mod monitor;
pub mod partition;
mod pipeline;
pub mod query;
pub mod tracker;

pub use dispatch::{Dispatcher, NodeHandle, PrerequisiteReport, WorkerCommand};
pub use monitor::{FailedNode, Monitor, MonitorOutcome};
pub use partition::{log_distribution, partition};
pub use pipeline::{Orchestrator, Submission, DEFAULT_PRIORITY};
pub use query::{
    BackendResponse, Hit, QueryBackend, QueryOrchestrator, QueryOutcome, QueryResult,
    RemoteQueryBackend,
};
pub use tracker::{JobEvent, JobOverview, JobSummary, JobTracker, RECENT_JOBS_LIMIT};
