//! Configuration module for the fleetindex system
//!
//! Configuration can be loaded from TOML files and/or environment variables.
//! The node pool (`[[nodes]]`) is fixed for the lifetime of the process.

mod defaults;
mod loading;


use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::warn;

use defaults::*;

/// Returns the path to the global configuration file
///
/// The global config is stored at `~/.fleetindex/config.toml`.
pub fn global_config_path() -> Result<PathBuf> {
    let home_dir = dirs::home_dir()
        .ok_or_else(|| Error::config("Unable to determine home directory".to_string()))?;
    Ok(home_dir.join(".fleetindex").join("config.toml"))
}

/// Main configuration structure for the fleetindex system
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Merged index and state file locations
    #[serde(default)]
    pub index: IndexConfig,

    /// Compute nodes, in declaration order
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    /// Remote transport settings
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Dispatch behavior
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Progress monitor behavior
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Query orchestrator settings
    #[serde(default)]
    pub query: QueryConfig,

    /// REST server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

/// Location and shape of the merged index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Prefix for merged artifacts (`<prefix>.vectors`, `.table.jsonl`, `.meta.json`)
    #[serde(default = "default_index_prefix")]
    pub prefix: PathBuf,

    /// JSON file recording every indexed path
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Directory where nodes write their partial indexes (shared storage)
    #[serde(default = "default_partials_dir")]
    pub partials_dir: PathBuf,

    /// Local scratch directory for per-job manifests
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Model every node and the query path must use
    #[serde(default = "default_model")]
    pub model_name: String,

    /// Embedding dimension of `model_name`
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            prefix: default_index_prefix(),
            state_file: default_state_file(),
            partials_dir: default_partials_dir(),
            work_dir: default_work_dir(),
            model_name: default_model(),
            embedding_dim: default_embedding_dim(),
        }
    }
}

/// A single compute node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Hostname used for transfer and execution
    pub hostname: String,

    /// Share of the work this node receives; required for partitioning
    #[serde(default)]
    pub weight: Option<f64>,

    /// Images per encode batch on the node
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Model override; falls back to `index.model_name`
    #[serde(default)]
    pub model: Option<String>,

    /// Informational only
    #[serde(default)]
    pub ram_gb: Option<u32>,
}

impl NodeConfig {
    /// Model this node runs
    pub fn model_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(fallback)
    }
}

/// Remote transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Login user on every node
    #[serde(default = "default_remote_user")]
    pub user: String,

    /// Working directory on every node
    #[serde(default = "default_remote_work_dir")]
    pub work_dir: String,

    /// Local worker executable pushed to every node
    #[serde(default = "default_worker_script")]
    pub worker_script: PathBuf,

    /// Interpreter used on the node, relative to `work_dir`
    #[serde(default = "default_python")]
    pub python: String,

    /// Extra options passed to ssh/scp
    #[serde(default = "default_ssh_options")]
    pub ssh_options: Vec<String>,

    /// Local root of the image tree (translated to `remote_root` on nodes)
    #[serde(default)]
    pub local_root: Option<PathBuf>,

    /// Node-side root of the image tree
    #[serde(default)]
    pub remote_root: Option<String>,

    /// Directory that must exist on every node for the prerequisite check
    #[serde(default)]
    pub shared_mount: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            user: default_remote_user(),
            work_dir: default_remote_work_dir(),
            worker_script: default_worker_script(),
            python: default_python(),
            ssh_options: default_ssh_options(),
            local_root: None,
            remote_root: None,
            shared_mount: None,
        }
    }
}

/// Dispatch configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Cancel already-started nodes when a later node fails to dispatch
    #[serde(default)]
    pub cancel_on_failure: bool,

    /// Run node prerequisite checks before dispatching a job
    #[serde(default)]
    pub check_prerequisites: bool,
}

/// Progress monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between polls of outstanding nodes
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up on still-running nodes after this many seconds (0 = wait forever)
    #[serde(default = "default_monitor_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_monitor_timeout_secs(),
        }
    }
}

/// Query orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Hostname of the node that serves queries (defaults to the heaviest node)
    #[serde(default)]
    pub node: Option<String>,

    /// Directory receiving copies of matched files
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Result count when the caller does not give one
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Query script name inside `remote.work_dir`
    #[serde(default = "default_query_script")]
    pub query_script: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            node: None,
            results_dir: default_results_dir(),
            default_top_k: default_top_k(),
            query_script: default_query_script(),
        }
    }
}

/// REST server configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Static allow-list for the `X-API-Key` header
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Reject requests without a valid key
    #[serde(default = "default_require_auth")]
    pub require_auth: bool,

    /// CORS allowed origins
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            api_keys: Vec::new(),
            require_auth: default_require_auth(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field(
                "api_keys",
                &format!("[{} keys ***REDACTED***]", self.api_keys.len()),
            )
            .field("require_auth", &self.require_auth)
            .field("allowed_origins", &self.allowed_origins)
            .finish()
    }
}

impl Config {
    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::config("At least one [[nodes]] entry is required"));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.hostname.trim().is_empty() {
                return Err(Error::config("Node hostname cannot be empty"));
            }
            if !seen.insert(node.hostname.as_str()) {
                return Err(Error::config(format!(
                    "Duplicate node hostname '{}'",
                    node.hostname
                )));
            }
            match node.weight {
                None => {
                    return Err(Error::config(format!(
                        "Node '{}' has no weight",
                        node.hostname
                    )))
                }
                Some(w) if !w.is_finite() || w <= 0.0 => {
                    return Err(Error::config(format!(
                        "Node '{}' weight must be a positive number, got {w}",
                        node.hostname
                    )))
                }
                Some(_) => {}
            }
            if node.batch_size == 0 {
                return Err(Error::config(format!(
                    "Node '{}' batch_size must be greater than 0",
                    node.hostname
                )));
            }
        }

        let weight_sum: f64 = self.nodes.iter().filter_map(|n| n.weight).sum();
        if (weight_sum - 1.0).abs() > 1e-6 {
            warn!(
                "Node weights sum to {weight_sum:.3}; node '{}' absorbs the difference",
                self.nodes.last().map(|n| n.hostname.as_str()).unwrap_or_default()
            );
        }

        if self.index.embedding_dim == 0 {
            return Err(Error::config(
                "index.embedding_dim must be greater than 0".to_string(),
            ));
        }

        if self.index.model_name.trim().is_empty() {
            return Err(Error::config("index.model_name cannot be empty"));
        }

        if let Some(query_node) = &self.query.node {
            if !self.nodes.iter().any(|n| &n.hostname == query_node) {
                return Err(Error::config(format!(
                    "query.node '{query_node}' is not a configured node"
                )));
            }
        }

        if self.query.default_top_k == 0 {
            return Err(Error::config(
                "query.default_top_k must be greater than 0".to_string(),
            ));
        }

        if self.monitor.poll_interval_ms == 0 {
            return Err(Error::config(
                "monitor.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.server.require_auth && self.server.api_keys.is_empty() {
            return Err(Error::config(
                "server.api_keys cannot be empty when server.require_auth is set",
            ));
        }

        if self.remote.local_root.is_some() != self.remote.remote_root.is_some() {
            return Err(Error::config(
                "remote.local_root and remote.remote_root must be set together",
            ));
        }

        Ok(())
    }

    /// Hostname of the node that serves text queries
    ///
    /// Uses `query.node` when set, otherwise the node with the largest weight
    /// (first one wins on ties).
    pub fn query_node(&self) -> Option<&NodeConfig> {
        match &self.query.node {
            Some(host) => self.nodes.iter().find(|n| &n.hostname == host),
            None => self.nodes.iter().fold(None, |best: Option<&NodeConfig>, n| {
                match best {
                    Some(b) if b.weight.unwrap_or(0.0) >= n.weight.unwrap_or(0.0) => Some(b),
                    _ => Some(n),
                }
            }),
        }
    }
}
