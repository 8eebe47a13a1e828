//! Submission and the per-job build pipeline
//!
//! A submission is deduplicated against the IndexedSet and against paths held
//! by active jobs, then runs as its own task:
//! partition -> dispatch -> monitor -> merge -> mark indexed.

use crate::dispatch::{Dispatcher, PrerequisiteReport};
use crate::monitor::Monitor;
use crate::partition::{log_distribution, partition};
use crate::tracker::{JobOverview, JobTracker};
use fleetindex_core::error::{Error, Result};
use fleetindex_core::{dedup_items, Config, Job, NodeSpec, WorkItem, NO_JOB_ID};
use fleetindex_index::{
    index_available, recover_interrupted_merge, IndexStats, IndexedSet, MergeReport, Merger,
};
use fleetindex_remote::RemoteExecutor;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

/// Priority used when the caller gives none
pub const DEFAULT_PRIORITY: &str = "normal";

/// Answer to a submission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub job_id: String,
    pub status: String,
    /// Distinct paths in the request
    pub images_count: usize,
    pub new_images_count: usize,
    pub already_indexed_count: usize,
    pub message: String,
}

/// Owns the node pool, job tracker and durable index state
pub struct Orchestrator {
    config: Config,
    nodes: Vec<NodeSpec>,
    executor: Arc<dyn RemoteExecutor>,
    tracker: JobTracker,
    indexed: RwLock<IndexedSet>,
    /// Paths owned by queued or running jobs
    pending: Mutex<HashSet<WorkItem>>,
    /// Serializes merge and IndexedSet updates across jobs
    commit_lock: Mutex<()>,
}

impl Orchestrator {
    /// Loads the IndexedSet and starts the job tracker
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config, executor: Arc<dyn RemoteExecutor>) -> Result<Arc<Self>> {
        config.validate()?;
        if recover_interrupted_merge(&config.index.prefix)? {
            warn!(
                "Rolled back an interrupted merge into {}",
                config.index.prefix.display()
            );
        }
        let indexed = IndexedSet::load(&config.index.state_file)?;
        let nodes = NodeSpec::from_config(&config);
        let (tracker, _task) = JobTracker::spawn();

        info!(
            "Orchestrator ready: {} nodes, {} images already indexed",
            nodes.len(),
            indexed.len()
        );

        Ok(Arc::new(Self {
            config,
            nodes,
            executor,
            tracker,
            indexed: RwLock::new(indexed),
            pending: Mutex::new(HashSet::new()),
            commit_lock: Mutex::new(()),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn executor(&self) -> Arc<dyn RemoteExecutor> {
        Arc::clone(&self.executor)
    }

    /// Accepts paths for indexing
    ///
    /// Returns job id [`NO_JOB_ID`] with status `completed` when every path is
    /// already indexed or owned by another active job.
    pub async fn submit<I, S>(
        self: &Arc<Self>,
        paths: I,
        priority: Option<String>,
    ) -> Result<Submission>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = dedup_items(paths);
        if items.is_empty() {
            return Err(Error::invalid_input("image_paths cannot be empty"));
        }
        let images_count = items.len();

        let mut pending = self.pending.lock().await;
        let (new, _) = self.indexed.read().await.split_new(items);
        let new: Vec<WorkItem> = new.into_iter().filter(|i| !pending.contains(i)).collect();
        let already_indexed_count = images_count - new.len();

        if new.is_empty() {
            info!("All {images_count} submitted images are already indexed");
            return Ok(Submission {
                job_id: NO_JOB_ID.to_string(),
                status: "completed".to_string(),
                images_count,
                new_images_count: 0,
                already_indexed_count,
                message: "All images already indexed".to_string(),
            });
        }

        let priority = priority.unwrap_or_else(|| DEFAULT_PRIORITY.to_string());
        let job = self.tracker.create(new, priority).await?;
        pending.extend(job.items.iter().cloned());
        drop(pending);

        let submission = Submission {
            job_id: job.id.clone(),
            status: job.status.name().to_string(),
            images_count,
            new_images_count: job.items.len(),
            already_indexed_count,
            message: format!("Queued {} new images for indexing", job.items.len()),
        };

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_job(job).await });

        Ok(submission)
    }

    /// Snapshot of a job, `NotFound` for an unknown id
    pub async fn job(&self, job_id: &str) -> Result<Job> {
        self.tracker.get(job_id).await
    }

    /// Waits until the job is Completed or Failed
    pub async fn wait_for(&self, job_id: &str) -> Result<Job> {
        self.tracker.wait_for(job_id).await
    }

    pub async fn overview(&self) -> Result<JobOverview> {
        self.tracker.overview().await
    }

    pub async fn total_indexed(&self) -> usize {
        self.indexed.read().await.len()
    }

    pub fn index_available(&self) -> bool {
        index_available(&self.config.index.prefix)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let last_updated = self.indexed.read().await.last_updated();
        let prefix = self.config.index.prefix.clone();
        let model_name = self.config.index.model_name.clone();
        let embedding_dim = self.config.index.embedding_dim;
        tokio::task::spawn_blocking(move || {
            IndexStats::collect(&prefix, last_updated, &model_name, embedding_dim)
        })
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("Stats task panicked: {e}")))?
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            Arc::clone(&self.executor),
            self.config.remote.clone(),
            self.config.dispatch.cancel_on_failure,
        )
    }

    /// Runs the prerequisite checks on every node
    pub async fn check_nodes(&self) -> Vec<PrerequisiteReport> {
        let dispatcher = self.dispatcher();
        let mut reports = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            reports.push(dispatcher.check_node(node).await);
        }
        reports
    }

    async fn run_job(self: Arc<Self>, job: Job) {
        let job_id = job.id.clone();
        let outcome = self.execute(&job).await;

        // Released before the terminal state is visible to waiters
        {
            let mut pending = self.pending.lock().await;
            for item in &job.items {
                pending.remove(item);
            }
        }

        let update = match outcome {
            Ok(report) => {
                info!(
                    "Job {job_id} completed: {} added, {} failed, {} total",
                    report.added, report.failed, report.total
                );
                self.tracker.mark_completed(&job_id, report.failed).await
            }
            Err(e) => {
                error!("Job {job_id} failed: {e}");
                self.tracker.mark_failed(&job_id, e.to_string()).await
            }
        };
        if let Err(e) = update {
            warn!("Could not record the outcome of job {job_id}: {e}");
        }
    }

    async fn execute(&self, job: &Job) -> Result<MergeReport> {
        self.tracker.mark_started(&job.id).await?;

        let dispatcher = self.dispatcher();
        if self.config.dispatch.check_prerequisites {
            dispatcher.check_prerequisites(&self.nodes).await?;
        }

        let chunks = partition(&job.items, &self.nodes)?;
        log_distribution(&chunks);

        let partials_dir = &self.config.index.partials_dir;
        std::fs::create_dir_all(partials_dir)?;
        let partial_prefix = partials_dir.join(&job.id);
        let handles = dispatcher
            .dispatch(&job.id, &chunks, &self.config.index.work_dir, &partial_prefix)
            .await?;

        let monitor = Monitor::from_config(Arc::clone(&self.executor), &self.config.monitor);
        let tracker = self.tracker.clone();
        let outcome = monitor
            .run(handles, |processed| tracker.report_progress(&job.id, processed))
            .await;
        if !outcome.all_succeeded() {
            return Err(Error::remote_execution(
                outcome
                    .failed
                    .iter()
                    .map(|f| f.node.node.hostname.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                outcome.failure_summary(),
            ));
        }

        let node_ids: Vec<usize> = outcome.succeeded.iter().map(|h| h.node.id).collect();
        self.commit(job, partial_prefix, node_ids).await
    }

    /// Merges the job's partials and records its items as indexed
    ///
    /// The merged index and the state file are replaced in one commit, so a
    /// failure leaves both as they were.
    async fn commit(
        &self,
        job: &Job,
        partial_prefix: PathBuf,
        node_ids: Vec<usize>,
    ) -> Result<MergeReport> {
        let _guard = self.commit_lock.lock().await;

        let merger = Merger::new(
            &self.config.index.prefix,
            &self.config.index.model_name,
            self.config.index.embedding_dim,
        );
        let mut updated = self.indexed.read().await.clone();
        updated.mark_indexed(&job.items, chrono::Utc::now());

        let (report, updated) = tokio::task::spawn_blocking(move || {
            let report = merger.merge_from(&partial_prefix, &node_ids, Some(&updated))?;
            Ok::<_, Error>((report, updated))
        })
        .await
        .map_err(|e| Error::merge(format!("Merge task panicked: {e}")))??;
        *self.indexed.write().await = updated;

        Ok(report)
    }
}
