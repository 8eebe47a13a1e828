//! Remote execution for fleetindex compute nodes
//!
//! The orchestrator only talks to nodes through [`RemoteExecutor`]: push a
//! file, start a detached command, poll it, run a short synchronous command.
//! [`SshExecutor`] implements this over the system `ssh`/`scp` clients and
//! [`MockExecutor`] follows per-host scripts for tests.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

mod executor;
mod mock;
mod ssh;

pub use executor::{
    parse_progress, shell_quote, CommandOutput, PollStatus, RemoteExecutor, RemoteHandle,
};
pub use mock::{HostScript, MockExecutor, PushRecord};
pub use ssh::SshExecutor;

use fleetindex_core::config::RemoteConfig;
use std::sync::Arc;

/// Create the executor described by the remote configuration
pub fn create_executor(config: &RemoteConfig) -> Arc<dyn RemoteExecutor> {
    Arc::new(SshExecutor::from_config(config))
}
