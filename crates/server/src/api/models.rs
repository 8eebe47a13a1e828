//! Request and response models for the REST API

use fleetindex_core::Job;
use fleetindex_index::IndexStats;
use fleetindex_orchestrator::{JobOverview, JobSummary, QueryOutcome, Submission};
use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

fn default_copy_results() -> bool {
    true
}

/// Paths to add to the index
#[derive(Debug, Deserialize, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct AddImagesRequest {
    /// Absolute image paths; must not be empty
    pub image_paths: Vec<String>,
    /// `low`, `normal` or `high` (informational)
    #[serde(default)]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct AddImagesResponse {
    pub job_id: String,
    pub status: String,
    pub images_count: usize,
    pub new_images_count: usize,
    pub already_indexed_count: usize,
    pub message: String,
}

impl From<Submission> for AddImagesResponse {
    fn from(s: Submission) -> Self {
        Self {
            job_id: s.job_id,
            status: s.status,
            images_count: s.images_count,
            new_images_count: s.new_images_count,
            already_indexed_count: s.already_indexed_count,
            message: s.message,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ProgressInfo {
    pub total_images: usize,
    pub processed_images: usize,
    pub failed_images: usize,
    pub percent_complete: f64,
}

/// Status of one job
///
/// `progress` is present once the job has started.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: String,
    pub progress: Option<ProgressInfo>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        let progress = job.status.started_at().map(|_| ProgressInfo {
            total_images: job.progress.total,
            processed_images: job.progress.processed,
            failed_images: job.progress.failed,
            percent_complete: job.progress.percent_complete(),
        });
        Self {
            job_id: job.id.clone(),
            status: job.status.name().to_string(),
            progress,
            started_at: job.status.started_at().map(|t| t.to_rfc3339()),
            completed_at: job.status.completed_at().map(|t| t.to_rfc3339()),
            error_message: job.status.error().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ActiveJob {
    pub job_id: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct RecentJob {
    pub job_id: String,
    pub status: String,
    pub created_at: String,
    pub images: usize,
}

impl From<JobSummary> for ActiveJob {
    fn from(j: JobSummary) -> Self {
        Self {
            job_id: j.job_id,
            status: j.status,
            created_at: j.created_at.to_rfc3339(),
        }
    }
}

impl From<JobSummary> for RecentJob {
    fn from(j: JobSummary) -> Self {
        Self {
            job_id: j.job_id,
            status: j.status,
            created_at: j.created_at.to_rfc3339(),
            images: j.images,
        }
    }
}

/// System-wide indexing status
#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct OverallStatusResponse {
    pub total_indexed_images: usize,
    pub active_jobs: usize,
    pub active_job_details: Vec<ActiveJob>,
    pub recent_jobs: Vec<RecentJob>,
    pub index_stats: IndexStats,
}

impl OverallStatusResponse {
    pub fn new(
        total_indexed_images: usize,
        overview: JobOverview,
        index_stats: IndexStats,
    ) -> Self {
        Self {
            total_indexed_images,
            active_jobs: overview.active.len(),
            active_job_details: overview.active.into_iter().map(ActiveJob::from).collect(),
            recent_jobs: overview.recent.into_iter().map(RecentJob::from).collect(),
            index_stats,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct QueryRequest {
    pub text: String,
    /// Defaults to `query.default_top_k`
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default = "default_copy_results")]
    pub copy_results: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct QueryResultItem {
    pub rank: usize,
    pub score: f32,
    pub path: String,
    pub copied_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct QueryResponse {
    pub query: String,
    pub model_name: String,
    pub results: Vec<QueryResultItem>,
    pub copied: usize,
    pub copy_failed: usize,
}

impl QueryResponse {
    pub fn new(query: String, outcome: QueryOutcome) -> Self {
        Self {
            query,
            model_name: outcome.model_name,
            results: outcome
                .results
                .into_iter()
                .map(|r| QueryResultItem {
                    rank: r.rank,
                    score: r.score,
                    path: r.path,
                    copied_to: r.copied_to.map(|p| p.to_string_lossy().into_owned()),
                })
                .collect(),
            copied: outcome.copied,
            copy_failed: outcome.copy_failed,
        }
    }
}
