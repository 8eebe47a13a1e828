//! Job records and their lifecycle
//!
//! A job moves `Queued -> Running -> {Completed, Failed}`. Each status variant
//! carries only the timestamps that exist in that state, and terminal states
//! reject every further transition.

use crate::error::{Error, Result};
use crate::work::WorkItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Job id returned when a submission contained nothing new
pub const NO_JOB_ID: &str = "none";

/// Lifecycle state of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running {
        started_at: DateTime<Utc>,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    Failed {
        started_at: Option<DateTime<Utc>>,
        completed_at: DateTime<Utc>,
        error: String,
    },
}

impl JobStatus {
    /// Lowercase status name used in API responses
    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running { .. } => "running",
            JobStatus::Completed { .. } => "completed",
            JobStatus::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed { .. } | JobStatus::Failed { .. })
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobStatus::Queued => None,
            JobStatus::Running { started_at } | JobStatus::Completed { started_at, .. } => {
                Some(*started_at)
            }
            JobStatus::Failed { started_at, .. } => *started_at,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobStatus::Completed { completed_at, .. } | JobStatus::Failed { completed_at, .. } => {
                Some(*completed_at)
            }
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            JobStatus::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Progress counters for a job
///
/// Counters only move forward and `processed` never exceeds `total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct JobProgress {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
}

impl JobProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            processed: 0,
            failed: 0,
        }
    }

    /// Percent complete rounded to one decimal, 0 for an empty job
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let pct = self.processed as f64 / self.total as f64 * 100.0;
        (pct * 10.0).round() / 10.0
    }

    /// Applies an observation, ignoring any decrease
    pub fn observe(&mut self, processed: usize, failed: usize) {
        self.processed = self.processed.max(processed.min(self.total));
        self.failed = self.failed.max(failed.min(self.total));
    }
}

/// A unit of tracked embedding work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub items: Vec<WorkItem>,
    pub priority: String,
    pub progress: JobProgress,
    pub created_at: DateTime<Utc>,
    pub status: JobStatus,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        items: Vec<WorkItem>,
        priority: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let total = items.len();
        Self {
            id: id.into(),
            items,
            priority: priority.into(),
            progress: JobProgress::new(total),
            created_at,
            status: JobStatus::Queued,
        }
    }

    fn transition_error(&self, target: &str) -> Error {
        Error::invalid_input(format!(
            "Job {} cannot move from {} to {target}",
            self.id,
            self.status.name()
        ))
    }

    /// `Queued -> Running`
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.status {
            JobStatus::Queued => {
                self.status = JobStatus::Running { started_at: now };
                Ok(())
            }
            _ => Err(self.transition_error("running")),
        }
    }

    /// Records node progress; ignored once the job is terminal
    pub fn record_progress(&mut self, processed: usize, failed: usize) {
        if self.status.is_active() {
            self.progress.observe(processed, failed);
        }
    }

    /// `Running -> Completed`, marking every item processed
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.status {
            JobStatus::Running { started_at } => {
                self.progress.processed = self.progress.total;
                self.status = JobStatus::Completed {
                    started_at,
                    completed_at: now,
                };
                Ok(())
            }
            _ => Err(self.transition_error("completed")),
        }
    }

    /// `Queued | Running -> Failed`
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(self.transition_error("failed"));
        }
        self.status = JobStatus::Failed {
            started_at: self.status.started_at(),
            completed_at: now,
            error: error.into(),
        };
        Ok(())
    }
}

/// Produces `idx_YYYYMMDD_HHMMSS` job ids, suffixing `_N` when the base id
/// has already been issued
///
/// Every issued id is remembered, so a clock that steps backwards never
/// yields a duplicate.
#[derive(Debug, Default)]
pub struct JobIdGenerator {
    issued: HashSet<String>,
}

impl JobIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self, now: DateTime<Utc>) -> String {
        let base = format!("idx_{}", now.format("%Y%m%d_%H%M%S"));
        let mut id = base.clone();
        let mut repeats = 0;
        while self.issued.contains(&id) {
            repeats += 1;
            id = format!("{base}_{repeats}");
        }
        self.issued.insert(id.clone());
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    fn job(n: usize) -> Job {
        let items = (0..n).map(|i| WorkItem::new(format!("/img/{i}.jpg"))).collect();
        Job::new("idx_test", items, "normal", at(0))
    }

    #[test]
    fn test_percent_complete() {
        let mut progress = JobProgress::new(3);
        progress.observe(1, 0);
        assert_eq!(progress.percent_complete(), 33.3);
        progress.observe(2, 0);
        assert_eq!(progress.percent_complete(), 66.7);
        assert_eq!(JobProgress::new(0).percent_complete(), 0.0);
    }

    #[test]
    fn test_progress_never_decreases_or_exceeds_total() {
        let mut progress = JobProgress::new(10);
        progress.observe(6, 1);
        progress.observe(4, 0);
        assert_eq!(progress.processed, 6);
        assert_eq!(progress.failed, 1);
        progress.observe(50, 0);
        assert_eq!(progress.processed, 10);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = job(4);
        job.start(at(1)).expect("queued job starts");
        job.record_progress(2, 0);
        assert_eq!(job.status.name(), "running");
        job.complete(at(5)).expect("running job completes");
        assert_eq!(job.progress.processed, 4);
        assert_eq!(job.status.started_at(), Some(at(1)));
        assert_eq!(job.status.completed_at(), Some(at(5)));
    }

    #[test]
    fn test_terminal_states_are_immutable() {
        let mut job = job(2);
        job.start(at(1)).expect("start");
        job.fail("node-b exited with status 1", at(2)).expect("fail");

        assert!(job.complete(at(3)).is_err());
        assert!(job.start(at(3)).is_err());
        assert!(job.fail("again", at(3)).is_err());
        assert_eq!(job.status.error(), Some("node-b exited with status 1"));

        job.record_progress(2, 0);
        assert_eq!(job.progress.processed, 0);
    }

    #[test]
    fn test_complete_requires_running() {
        let mut job = job(1);
        assert!(job.complete(at(1)).is_err());
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn test_status_serializes_tagged() {
        let status = JobStatus::Running { started_at: at(0) };
        let value = serde_json::to_value(&status).expect("serialize");
        assert_eq!(value["status"], "running");
        assert!(value.get("started_at").is_some());
    }

    #[test]
    fn test_job_ids_within_same_second() {
        let mut ids = JobIdGenerator::new();
        let first = ids.next_id(at(0));
        let second = ids.next_id(at(0));
        let third = ids.next_id(at(1));
        assert!(first.starts_with("idx_2023"));
        assert_eq!(second, format!("{first}_1"));
        assert_ne!(third, first);
        assert!(!third.ends_with("_1"));
    }

    #[test]
    fn test_job_ids_survive_clock_stepping_back() {
        let mut ids = JobIdGenerator::new();
        let first = ids.next_id(at(5));
        let second = ids.next_id(at(5));
        ids.next_id(at(6));

        // Clock goes back to an already used second
        let again = ids.next_id(at(5));
        assert_ne!(again, first);
        assert_ne!(again, second);
        assert_eq!(again, format!("{first}_2"));
    }
}
