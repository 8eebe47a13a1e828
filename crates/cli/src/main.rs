//! fleetindex CLI - distributed image embedding build and search
//!
//! This binary provides the command-line interface for the fleetindex system.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleetindex::discovery::find_images;
use fleetindex::report;
use fleetindex_core::config::Config;
use fleetindex_core::{NodeSpec, NO_JOB_ID};
use fleetindex_index::{IndexStats, IndexedSet};
use fleetindex_orchestrator::{Dispatcher, Orchestrator, QueryOrchestrator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Interval between progress lines while `build` waits
const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "fleetindex")]
#[command(about = "Distributed image embedding build-and-merge orchestrator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server
    Serve,
    /// Index every new image under a directory and wait for the job
    Build {
        /// Directory scanned recursively for images
        #[arg(long, value_name = "DIR")]
        image_dir: PathBuf,
    },
    /// Search the merged index with a text query
    Query {
        /// Query text, e.g. "a yellow car"
        #[arg(long)]
        text: String,
        /// Number of results (defaults to query.default_top_k)
        #[arg(long)]
        top_k: Option<usize>,
        /// Only print results, don't copy matched files
        #[arg(long)]
        no_copy_results: bool,
    },
    /// Print index statistics
    Status,
    /// Check that every node is reachable and ready to run workers
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    let config_path = cli.config.as_deref();
    match cli.command {
        Some(Commands::Serve) => serve(config_path).await,
        Some(Commands::Build { image_dir }) => build(config_path, &image_dir).await,
        Some(Commands::Query {
            text,
            top_k,
            no_copy_results,
        }) => query(config_path, &text, top_k, !no_copy_results).await,
        Some(Commands::Status) => status(config_path),
        Some(Commands::Check) => check(config_path).await,
        None => {
            println!("Run 'fleetindex serve' to start the REST API, or --help for more options");
            Ok(())
        }
    }
}

/// Initialize logging system
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };

    let default_filter = [
        "fleetindex",
        "fleetindex_core",
        "fleetindex_remote",
        "fleetindex_index",
        "fleetindex_orchestrator",
        "fleetindex_server",
        "tower_http",
    ]
    .iter()
    .map(|target| format!("{target}={level}"))
    .collect::<Vec<_>>()
    .join(",");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    Ok(())
}

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load(config_path)?;
    config.validate()?;
    Ok(config)
}

async fn serve(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    info!("Starting REST API with {} nodes", config.nodes.len());
    fleetindex_server::run_server(config).await?;
    Ok(())
}

async fn build(config_path: Option<&Path>, image_dir: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let images = find_images(image_dir)?;
    if images.is_empty() {
        println!("No images found under {}", image_dir.display());
        return Ok(());
    }

    let executor = fleetindex_remote::create_executor(&config.remote);
    let orchestrator = Orchestrator::new(config, executor)?;
    let submission = orchestrator.submit(images, None).await?;
    println!("{}", submission.message);
    if submission.job_id == NO_JOB_ID {
        return Ok(());
    }

    let wait = orchestrator.wait_for(&submission.job_id);
    tokio::pin!(wait);
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    ticker.tick().await;

    let job = loop {
        tokio::select! {
            job = &mut wait => break job?,
            _ = ticker.tick() => {
                let job = orchestrator.job(&submission.job_id).await?;
                info!(
                    "Job {}: {}/{} images ({:.1}%)",
                    job.id,
                    job.progress.processed,
                    job.progress.total,
                    job.progress.percent_complete()
                );
            }
        }
    };

    print!("{}", report::job_summary(&job));
    if job.status.error().is_some() {
        anyhow::bail!("Job {} failed", job.id);
    }
    Ok(())
}

async fn query(
    config_path: Option<&Path>,
    text: &str,
    top_k: Option<usize>,
    copy_results: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let executor = fleetindex_remote::create_executor(&config.remote);
    let orchestrator = QueryOrchestrator::from_config(executor, &config)?;
    let top_k = top_k.unwrap_or(config.query.default_top_k);

    let outcome = orchestrator.query(text, top_k, copy_results).await?;
    print!("{}", report::query_summary(text, &outcome));
    if outcome.copied > 0 {
        println!("Results directory: {}", config.query.results_dir.display());
    }
    Ok(())
}

fn status(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let indexed = IndexedSet::load(&config.index.state_file).with_context(|| {
        format!(
            "Failed to read state file {}",
            config.index.state_file.display()
        )
    })?;
    let stats = IndexStats::collect(
        &config.index.prefix,
        indexed.last_updated(),
        &config.index.model_name,
        config.index.embedding_dim,
    )?;
    print!("{}", report::stats_summary(&stats));
    println!("Indexed paths:  {}", indexed.len());
    Ok(())
}

async fn check(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let executor = fleetindex_remote::create_executor(&config.remote);
    let dispatcher = Dispatcher::new(
        Arc::clone(&executor),
        config.remote.clone(),
        config.dispatch.cancel_on_failure,
    );

    let mut reports = Vec::new();
    for node in NodeSpec::from_config(&config) {
        reports.push(dispatcher.check_node(&node).await);
    }
    print!("{}", report::check_summary(&reports));

    let failed = reports.iter().filter(|r| !r.ok()).count();
    if failed > 0 {
        anyhow::bail!("{failed} node(s) are not ready");
    }
    Ok(())
}
