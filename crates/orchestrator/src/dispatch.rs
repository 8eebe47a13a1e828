//! Pushing chunks to nodes and starting their workers

use fleetindex_core::artifacts::worker_prefix;
use fleetindex_core::config::RemoteConfig;
use fleetindex_core::error::{Error, Result, ResultExt};
use fleetindex_core::{Chunk, NodeSpec, PathMapping};
use fleetindex_remote::{shell_quote, RemoteExecutor, RemoteHandle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A worker started on one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeHandle {
    pub node: NodeSpec,
    pub handle: RemoteHandle,
    /// Items in the node's chunk
    pub items: usize,
}

/// Arguments of one worker invocation
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    pub work_dir: String,
    pub python: String,
    pub script: String,
    pub image_list: String,
    pub index_prefix: String,
    pub worker_id: usize,
    pub batch_size: usize,
    pub model_name: String,
}

impl WorkerCommand {
    /// Shell command run on the node
    pub fn render(&self) -> String {
        format!(
            "cd {} && {} {} --image-list {} --index-prefix {} --worker-id {} --batch-size {} --model-name {}",
            shell_quote(&self.work_dir),
            shell_quote(&self.python),
            shell_quote(&self.script),
            shell_quote(&self.image_list),
            shell_quote(&self.index_prefix),
            self.worker_id,
            self.batch_size,
            shell_quote(&self.model_name),
        )
    }
}

/// Result of checking one node before dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerequisiteReport {
    pub hostname: String,
    pub reachable: bool,
    /// `None` when no shared mount is configured
    pub shared_mount: Option<bool>,
    pub python: bool,
    pub detail: Option<String>,
}

impl PrerequisiteReport {
    pub fn ok(&self) -> bool {
        self.reachable && self.shared_mount.unwrap_or(true) && self.python
    }
}

/// Sends chunks to nodes through a [`RemoteExecutor`]
pub struct Dispatcher {
    executor: Arc<dyn RemoteExecutor>,
    remote: RemoteConfig,
    mapping: PathMapping,
    cancel_on_failure: bool,
}

impl Dispatcher {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        remote: RemoteConfig,
        cancel_on_failure: bool,
    ) -> Self {
        let mapping = PathMapping::from_remote_config(&remote);
        Self {
            executor,
            remote,
            mapping,
            cancel_on_failure,
        }
    }

    pub fn mapping(&self) -> &PathMapping {
        &self.mapping
    }

    fn remote_path(&self, name: &str) -> String {
        format!("{}/{name}", self.remote.work_dir.trim_end_matches('/'))
    }

    fn script_name(&self) -> Result<String> {
        self.remote
            .worker_script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::config(format!(
                    "Invalid worker script path: {}",
                    self.remote.worker_script.display()
                ))
            })
    }

    /// Checks that `node` is reachable and has the interpreter and shared mount
    pub async fn check_node(&self, node: &NodeSpec) -> PrerequisiteReport {
        let mut report = PrerequisiteReport {
            hostname: node.hostname.clone(),
            reachable: false,
            shared_mount: None,
            python: false,
            detail: None,
        };

        match self.executor.run(&node.hostname, "true").await {
            Ok(output) if output.success() => report.reachable = true,
            Ok(output) => {
                report.detail = Some(output.stderr.trim().to_string());
                return report;
            }
            Err(e) => {
                report.detail = Some(e.to_string());
                return report;
            }
        }

        if let Some(mount) = &self.remote.shared_mount {
            let ok = self
                .executor
                .run(&node.hostname, &format!("test -d {}", shell_quote(mount)))
                .await
                .map(|o| o.success())
                .unwrap_or(false);
            report.shared_mount = Some(ok);
            if !ok {
                report.detail = Some(format!("shared mount {mount} not present"));
            }
        }

        let python = self.remote_path(&self.remote.python);
        report.python = self
            .executor
            .run(&node.hostname, &format!("test -x {}", shell_quote(&python)))
            .await
            .map(|o| o.success())
            .unwrap_or(false);
        if !report.python && report.detail.is_none() {
            report.detail = Some(format!("{python} not found"));
        }

        report
    }

    /// Checks every node, failing on the first one that is not ready
    pub async fn check_prerequisites(&self, nodes: &[NodeSpec]) -> Result<Vec<PrerequisiteReport>> {
        let mut reports = Vec::with_capacity(nodes.len());
        for node in nodes {
            let report = self.check_node(node).await;
            if !report.reachable {
                return Err(Error::connectivity(
                    &node.hostname,
                    report.detail.unwrap_or_else(|| "unreachable".to_string()),
                ));
            }
            if !report.ok() {
                return Err(Error::config(format!(
                    "Node '{}' is missing prerequisites: {}",
                    node.hostname,
                    report.detail.as_deref().unwrap_or("unknown")
                )));
            }
            info!("Node {} passed prerequisite checks", node.hostname);
            reports.push(report);
        }
        Ok(reports)
    }

    /// Writes the manifest for `chunk` and returns its local path
    fn write_manifest(&self, chunk: &Chunk, job_id: &str, manifest_dir: &Path) -> Result<PathBuf> {
        let path = manifest_dir.join(format!("{job_id}_worker_{}.txt", chunk.node.id));
        let mut content = String::new();
        for item in &chunk.items {
            content.push_str(&self.mapping.to_remote(item.as_str()));
            content.push('\n');
        }
        std::fs::write(&path, content)
            .context(format!("Failed to write manifest {}", path.display()))?;
        Ok(path)
    }

    async fn dispatch_chunk(
        &self,
        chunk: &Chunk,
        job_id: &str,
        manifest_dir: &Path,
        partial_prefix: &Path,
        script_name: &str,
    ) -> Result<NodeHandle> {
        let host = chunk.node.hostname.as_str();
        let manifest = self.write_manifest(chunk, job_id, manifest_dir)?;
        let manifest_name = manifest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let remote_manifest = self.remote_path(&manifest_name);

        self.executor.ensure_dir(host, &self.remote.work_dir).await?;
        self.executor
            .push(host, &self.remote.worker_script, &self.remote_path(script_name))
            .await?;
        self.executor.push(host, &manifest, &remote_manifest).await?;

        let node_prefix = worker_prefix(partial_prefix, chunk.node.id);
        let command = WorkerCommand {
            work_dir: self.remote.work_dir.clone(),
            python: self.remote.python.clone(),
            script: script_name.to_string(),
            image_list: remote_manifest,
            index_prefix: self.mapping.to_remote(&node_prefix.to_string_lossy()),
            worker_id: chunk.node.id,
            batch_size: chunk.node.batch_size,
            model_name: chunk.node.model.clone(),
        }
        .render();
        debug!(host, %command, "Starting worker");

        let handle = self.executor.start(host, &command).await?;
        Ok(NodeHandle {
            node: chunk.node.clone(),
            handle,
            items: chunk.len(),
        })
    }

    /// Dispatches every non-empty chunk in order
    ///
    /// Stops at the first node that fails to receive its files or start. Nodes
    /// already started keep running unless `cancel_on_failure` is set.
    pub async fn dispatch(
        &self,
        job_id: &str,
        chunks: &[Chunk],
        manifest_dir: &Path,
        partial_prefix: &Path,
    ) -> Result<Vec<NodeHandle>> {
        if !self.remote.worker_script.is_file() {
            return Err(Error::config(format!(
                "Worker script not found: {}",
                self.remote.worker_script.display()
            )));
        }
        let script_name = self.script_name()?;
        std::fs::create_dir_all(manifest_dir)
            .context(format!("Failed to create {}", manifest_dir.display()))?;

        let mut started = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk.is_empty() {
                info!("Skipping {}: no items assigned", chunk.node.hostname);
                continue;
            }

            match self
                .dispatch_chunk(chunk, job_id, manifest_dir, partial_prefix, &script_name)
                .await
            {
                Ok(handle) => {
                    info!(
                        "Started worker {} on {} with {} items",
                        chunk.node.id,
                        chunk.node.hostname,
                        chunk.len()
                    );
                    started.push(handle);
                }
                Err(e) => {
                    self.abandon(&started).await;
                    return Err(e);
                }
            }
        }

        Ok(started)
    }

    async fn abandon(&self, started: &[NodeHandle]) {
        if started.is_empty() {
            return;
        }
        if !self.cancel_on_failure {
            warn!(
                "Dispatch aborted; {} already started worker(s) left running",
                started.len()
            );
            return;
        }
        for node in started {
            if let Err(e) = self.executor.cancel(node.handle).await {
                warn!("Failed to cancel worker on {}: {e}", node.node.hostname);
            }
        }
        info!("Cancelled {} already started worker(s)", started.len());
    }

    /// Cancels started workers
    pub async fn cancel_all(&self, handles: &[NodeHandle]) {
        for node in handles {
            if let Err(e) = self.executor.cancel(node.handle).await {
                warn!("Failed to cancel worker on {}: {e}", node.node.hostname);
            }
        }
    }
}
