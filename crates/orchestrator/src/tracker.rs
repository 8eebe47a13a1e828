//! Job records owned by a single actor task
//!
//! Every mutation arrives as a [`JobEvent`] over an mpsc channel and reads are
//! answered through oneshot replies, so job state is never shared behind a
//! lock. The actor stops once every [`JobTracker`] clone is dropped.

use chrono::{DateTime, Utc};
use fleetindex_core::error::{Error, Result};
use fleetindex_core::{Job, JobIdGenerator, WorkItem};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Number of finished jobs reported in an overview
pub const RECENT_JOBS_LIMIT: usize = 10;

const CHANNEL_CAPACITY: usize = 256;

/// Messages handled by the tracker actor
#[derive(Debug)]
pub enum JobEvent {
    Create {
        items: Vec<WorkItem>,
        priority: String,
        reply: oneshot::Sender<Job>,
    },
    Started {
        job_id: String,
    },
    Progress {
        job_id: String,
        processed: usize,
        failed: usize,
    },
    Completed {
        job_id: String,
        failed: usize,
    },
    Failed {
        job_id: String,
        error: String,
    },
    Get {
        job_id: String,
        reply: oneshot::Sender<Option<Job>>,
    },
    /// Replies once the job is terminal (immediately if it already is)
    Watch {
        job_id: String,
        reply: oneshot::Sender<Option<Job>>,
    },
    Overview {
        reply: oneshot::Sender<JobOverview>,
    },
}

/// Short description of a job for listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub images: usize,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status.name().to_string(),
            created_at: job.created_at,
            images: job.progress.total,
        }
    }
}

/// Active jobs plus the most recent finished ones
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobOverview {
    /// Queued and running jobs, oldest first
    pub active: Vec<JobSummary>,
    /// Up to [`RECENT_JOBS_LIMIT`] finished jobs, newest first
    pub recent: Vec<JobSummary>,
}

/// Cloneable handle to the tracker actor
#[derive(Debug, Clone)]
pub struct JobTracker {
    tx: mpsc::Sender<JobEvent>,
}

fn actor_gone() -> Error {
    Error::Other(anyhow::anyhow!("Job tracker is no longer running"))
}

impl JobTracker {
    /// Starts the actor task
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(TrackerActor::default().run(rx));
        (Self { tx }, task)
    }

    async fn send(&self, event: JobEvent) -> Result<()> {
        self.tx.send(event).await.map_err(|_| actor_gone())
    }

    async fn ask<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> JobEvent) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| actor_gone())
    }

    /// Creates a queued job for `items`
    pub async fn create(&self, items: Vec<WorkItem>, priority: impl Into<String>) -> Result<Job> {
        let priority = priority.into();
        self.ask(|reply| JobEvent::Create {
            items,
            priority,
            reply,
        })
        .await
    }

    pub async fn mark_started(&self, job_id: &str) -> Result<()> {
        self.send(JobEvent::Started {
            job_id: job_id.to_string(),
        })
        .await
    }

    pub async fn record_progress(
        &self,
        job_id: &str,
        processed: usize,
        failed: usize,
    ) -> Result<()> {
        self.send(JobEvent::Progress {
            job_id: job_id.to_string(),
            processed,
            failed,
        })
        .await
    }

    /// Non-blocking progress update for synchronous callbacks
    ///
    /// Dropped when the channel is full; a later observation supersedes it.
    pub fn report_progress(&self, job_id: &str, processed: usize) {
        let event = JobEvent::Progress {
            job_id: job_id.to_string(),
            processed,
            failed: 0,
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(event) {
            debug!("Tracker busy, skipped progress update for {job_id}");
        }
    }

    pub async fn mark_completed(&self, job_id: &str, failed: usize) -> Result<()> {
        self.send(JobEvent::Completed {
            job_id: job_id.to_string(),
            failed,
        })
        .await
    }

    pub async fn mark_failed(&self, job_id: &str, error: impl Into<String>) -> Result<()> {
        self.send(JobEvent::Failed {
            job_id: job_id.to_string(),
            error: error.into(),
        })
        .await
    }

    /// Snapshot of one job, `NotFound` for an unknown id
    pub async fn get(&self, job_id: &str) -> Result<Job> {
        let id = job_id.to_string();
        self.ask(|reply| JobEvent::Get { job_id: id, reply })
            .await?
            .ok_or_else(|| Error::not_found(format!("Job {job_id} not found")))
    }

    /// Waits until the job is Completed or Failed
    pub async fn wait_for(&self, job_id: &str) -> Result<Job> {
        let id = job_id.to_string();
        self.ask(|reply| JobEvent::Watch { job_id: id, reply })
            .await?
            .ok_or_else(|| Error::not_found(format!("Job {job_id} not found")))
    }

    pub async fn overview(&self) -> Result<JobOverview> {
        self.ask(|reply| JobEvent::Overview { reply }).await
    }
}

#[derive(Default)]
struct TrackerActor {
    jobs: HashMap<String, Job>,
    ids: JobIdGenerator,
    watchers: HashMap<String, Vec<oneshot::Sender<Option<Job>>>>,
}

impl TrackerActor {
    async fn run(mut self, mut rx: mpsc::Receiver<JobEvent>) {
        debug!("Job tracker started");
        while let Some(event) = rx.recv().await {
            self.handle(event);
        }
        debug!("Job tracker stopped with {} jobs", self.jobs.len());
    }

    fn handle(&mut self, event: JobEvent) {
        match event {
            JobEvent::Create {
                items,
                priority,
                reply,
            } => {
                let now = Utc::now();
                let job = Job::new(self.ids.next_id(now), items, priority, now);
                info!("Created job {} with {} items", job.id, job.progress.total);
                self.jobs.insert(job.id.clone(), job.clone());
                let _ = reply.send(job);
            }
            JobEvent::Started { job_id } => {
                self.update(&job_id, |job| job.start(Utc::now()));
            }
            JobEvent::Progress {
                job_id,
                processed,
                failed,
            } => {
                self.update(&job_id, |job| {
                    job.record_progress(processed, failed);
                    Ok(())
                });
            }
            JobEvent::Completed { job_id, failed } => {
                self.update(&job_id, |job| {
                    job.record_progress(job.progress.processed, failed);
                    job.complete(Utc::now())
                });
            }
            JobEvent::Failed { job_id, error } => {
                self.update(&job_id, |job| job.fail(error, Utc::now()));
            }
            JobEvent::Get { job_id, reply } => {
                let _ = reply.send(self.jobs.get(&job_id).cloned());
            }
            JobEvent::Watch { job_id, reply } => match self.jobs.get(&job_id) {
                Some(job) if job.status.is_active() => {
                    self.watchers.entry(job_id).or_default().push(reply);
                }
                other => {
                    let _ = reply.send(other.cloned());
                }
            },
            JobEvent::Overview { reply } => {
                let _ = reply.send(self.overview());
            }
        }
    }

    fn update(&mut self, job_id: &str, apply: impl FnOnce(&mut Job) -> Result<()>) {
        let Some(job) = self.jobs.get_mut(job_id) else {
            warn!("Event for unknown job {job_id}");
            return;
        };
        if let Err(e) = apply(job) {
            warn!("Ignoring event: {e}");
            return;
        }
        if job.status.is_terminal() {
            info!("Job {} is {}", job.id, job.status.name());
            if let Some(waiting) = self.watchers.remove(job_id) {
                for reply in waiting {
                    let _ = reply.send(Some(job.clone()));
                }
            }
        }
    }

    fn overview(&self) -> JobOverview {
        let mut active: Vec<&Job> = self.jobs.values().filter(|j| j.status.is_active()).collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut recent: Vec<&Job> = self
            .jobs
            .values()
            .filter(|j| j.status.is_terminal())
            .collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        recent.truncate(RECENT_JOBS_LIMIT);

        JobOverview {
            active: active.into_iter().map(JobSummary::from).collect(),
            recent: recent.into_iter().map(JobSummary::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetindex_core::JobStatus;

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n).map(|i| WorkItem::new(format!("/img/{i}.jpg"))).collect()
    }

    #[tokio::test]
    async fn test_lifecycle_through_events() {
        let (tracker, _task) = JobTracker::spawn();
        let job = tracker.create(items(4), "normal").await.expect("create");
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.id.starts_with("idx_"));

        tracker.mark_started(&job.id).await.expect("send");
        tracker.record_progress(&job.id, 3, 0).await.expect("send");
        tracker.record_progress(&job.id, 1, 0).await.expect("send");

        let running = tracker.get(&job.id).await.expect("get");
        assert_eq!(running.status.name(), "running");
        assert_eq!(running.progress.processed, 3);

        tracker.mark_completed(&job.id, 1).await.expect("send");
        let done = tracker.get(&job.id).await.expect("get");
        assert_eq!(done.status.name(), "completed");
        assert_eq!(done.progress.processed, 4);
        assert_eq!(done.progress.failed, 1);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let (tracker, _task) = JobTracker::spawn();
        let err = tracker.get("idx_missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.to_string(), "Not found: Job idx_missing not found");
        assert!(tracker.overview().await.expect("overview").active.is_empty());
    }

    #[tokio::test]
    async fn test_failed_job_ignores_later_events() {
        let (tracker, _task) = JobTracker::spawn();
        let job = tracker.create(items(2), "high").await.expect("create");
        tracker.mark_started(&job.id).await.expect("send");
        tracker.mark_failed(&job.id, "node-b: exit 1").await.expect("send");
        tracker.mark_completed(&job.id, 0).await.expect("send");

        let job = tracker.get(&job.id).await.expect("get");
        assert_eq!(job.status.error(), Some("node-b: exit 1"));
    }

    #[tokio::test]
    async fn test_wait_for_resolves_on_terminal_state() {
        let (tracker, _task) = JobTracker::spawn();
        let job = tracker.create(items(1), "normal").await.expect("create");

        let waiter = {
            let tracker = tracker.clone();
            let id = job.id.clone();
            tokio::spawn(async move { tracker.wait_for(&id).await })
        };
        tracker.mark_started(&job.id).await.expect("send");
        tracker.mark_completed(&job.id, 0).await.expect("send");

        let finished = waiter.await.expect("join").expect("wait");
        assert_eq!(finished.status.name(), "completed");

        // Already terminal
        let again = tracker.wait_for(&job.id).await.expect("wait");
        assert_eq!(again.status.name(), "completed");
    }

    #[tokio::test]
    async fn test_overview_splits_active_and_recent() {
        let (tracker, _task) = JobTracker::spawn();
        let mut ids = Vec::new();
        for _ in 0..12 {
            let job = tracker.create(items(1), "normal").await.expect("create");
            tracker.mark_started(&job.id).await.expect("send");
            tracker.mark_completed(&job.id, 0).await.expect("send");
            ids.push(job.id);
        }
        let pending = tracker.create(items(2), "normal").await.expect("create");

        let overview = tracker.overview().await.expect("overview");
        assert_eq!(overview.active.len(), 1);
        assert_eq!(overview.active[0].job_id, pending.id);
        assert_eq!(overview.active[0].status, "queued");
        assert_eq!(overview.recent.len(), RECENT_JOBS_LIMIT);
        assert!(overview
            .recent
            .windows(2)
            .all(|w| w[0].created_at >= w[1].created_at));
        assert!(overview.recent.iter().all(|j| j.status == "completed"));
    }
}
