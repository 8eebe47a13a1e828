//! Plain-text summaries printed by the CLI

use fleetindex_core::Job;
use fleetindex_index::IndexStats;
use fleetindex_orchestrator::{PrerequisiteReport, QueryOutcome};
use std::fmt::Write;

pub fn job_summary(job: &Job) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Job {}: {}", job.id, job.status.name());
    let _ = writeln!(
        out,
        "  images: {} processed, {} failed, {} total ({:.1}%)",
        job.progress.processed,
        job.progress.failed,
        job.progress.total,
        job.progress.percent_complete()
    );
    if let (Some(start), Some(end)) = (job.status.started_at(), job.status.completed_at()) {
        let secs = (end - start).num_milliseconds() as f64 / 1000.0;
        let _ = writeln!(out, "  elapsed: {secs:.1}s");
    }
    if let Some(error) = job.status.error() {
        let _ = writeln!(out, "  error: {error}");
    }
    out
}

pub fn stats_summary(stats: &IndexStats) -> String {
    format!(
        "Model:          {}\n\
         Dimension:      {}\n\
         Images:         {}\n\
         Failed:         {}\n\
         Size:           {:.2} MB\n\
         Last updated:   {}\n",
        stats.model_name,
        stats.embedding_dim,
        stats.total_images,
        stats.num_failed,
        stats.index_size_mb,
        stats.last_updated
    )
}

pub fn query_summary(text: &str, outcome: &QueryOutcome) -> String {
    let mut out = format!("Results for {text:?} ({}):\n", outcome.model_name);
    if outcome.results.is_empty() {
        out.push_str("  no matches\n");
    }
    for result in &outcome.results {
        let _ = writeln!(
            out,
            "  {:2}. score={:.4}  {}",
            result.rank, result.score, result.path
        );
    }
    if outcome.copied + outcome.copy_failed > 0 {
        let _ = writeln!(
            out,
            "Copied {} result(s), {} failed",
            outcome.copied, outcome.copy_failed
        );
    }
    out
}

pub fn check_summary(reports: &[PrerequisiteReport]) -> String {
    let mut out = String::new();
    for report in reports {
        let verdict = if report.ok() { "ok" } else { "FAILED" };
        let _ = write!(out, "{:<24} {verdict}", report.hostname);
        if let Some(detail) = &report.detail {
            let _ = write!(out, " ({detail})");
        }
        out.push('\n');
    }
    out
}
