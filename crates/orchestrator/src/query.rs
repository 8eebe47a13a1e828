//! Text queries against the merged index
//!
//! Embedding the text and searching happen on a query node behind
//! [`QueryBackend`]. Locally the hits are resolved to paths through the merged
//! table and, on request, the matched files are copied into a results
//! directory.

use async_trait::async_trait;
use chrono::Local;
use fleetindex_core::error::{Error, Result};
use fleetindex_core::{Config, PathMapping};
use fleetindex_index::PathTable;
use fleetindex_remote::{shell_quote, RemoteExecutor};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One nearest-neighbor hit as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub score: f32,
    /// Global id; negative when the search found fewer than `top_k` entries
    pub id: i64,
}

/// What the query node reports for one search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse {
    pub model_name: String,
    pub embedding_dim: usize,
    pub hits: Vec<Hit>,
}

/// Embeds a text query and searches the merged index
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn search(&self, text: &str, top_k: usize) -> Result<BackendResponse>;
}

/// Runs the query script on the query node and reads its JSON answer
pub struct RemoteQueryBackend {
    executor: Arc<dyn RemoteExecutor>,
    host: String,
    work_dir: String,
    python: String,
    script: String,
    index_prefix: String,
}

impl RemoteQueryBackend {
    pub fn from_config(executor: Arc<dyn RemoteExecutor>, config: &Config) -> Result<Self> {
        let node = config
            .query_node()
            .ok_or_else(|| Error::config("No query node configured"))?;
        let mapping = PathMapping::from_remote_config(&config.remote);
        Ok(Self {
            executor,
            host: node.hostname.clone(),
            work_dir: config.remote.work_dir.clone(),
            python: config.remote.python.clone(),
            script: config.query.query_script.clone(),
            index_prefix: mapping.to_remote(&config.index.prefix.to_string_lossy()),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn command(&self, text: &str, top_k: usize) -> String {
        format!(
            "cd {} && {} {} --index-prefix {} --text {} --top-k {top_k} --json",
            shell_quote(&self.work_dir),
            shell_quote(&self.python),
            shell_quote(&self.script),
            shell_quote(&self.index_prefix),
            shell_quote(text),
        )
    }
}

/// Last stdout line that parses as a [`BackendResponse`]
fn parse_response(stdout: &str) -> Option<BackendResponse> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str(line).ok())
}

#[async_trait]
impl QueryBackend for RemoteQueryBackend {
    async fn search(&self, text: &str, top_k: usize) -> Result<BackendResponse> {
        let output = self.executor.run(&self.host, &self.command(text, top_k)).await?;
        if !output.success() {
            return Err(Error::remote_execution(
                &self.host,
                format!("Query failed: {}", output.stderr.trim()),
            ));
        }
        parse_response(&output.stdout).ok_or_else(|| {
            Error::remote_execution(&self.host, "Query produced no result line")
        })
    }
}

/// A resolved search result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub rank: usize,
    pub score: f32,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copied_to: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub model_name: String,
    pub results: Vec<QueryResult>,
    pub copied: usize,
    pub copy_failed: usize,
}

/// Resolves backend hits against the local merged table
pub struct QueryOrchestrator {
    backend: Arc<dyn QueryBackend>,
    index_prefix: PathBuf,
    results_dir: PathBuf,
    mapping: PathMapping,
}

impl QueryOrchestrator {
    pub fn new(
        backend: Arc<dyn QueryBackend>,
        index_prefix: impl Into<PathBuf>,
        results_dir: impl Into<PathBuf>,
        mapping: PathMapping,
    ) -> Self {
        Self {
            backend,
            index_prefix: index_prefix.into(),
            results_dir: results_dir.into(),
            mapping,
        }
    }

    pub fn from_config(executor: Arc<dyn RemoteExecutor>, config: &Config) -> Result<Self> {
        let backend = RemoteQueryBackend::from_config(executor, config)?;
        Ok(Self::new(
            Arc::new(backend),
            &config.index.prefix,
            &config.query.results_dir,
            PathMapping::from_remote_config(&config.remote),
        ))
    }

    pub async fn query(
        &self,
        text: &str,
        top_k: usize,
        copy_results: bool,
    ) -> Result<QueryOutcome> {
        if text.trim().is_empty() {
            return Err(Error::invalid_input("Query text cannot be empty"));
        }
        if top_k == 0 {
            return Err(Error::invalid_input("top_k must be greater than 0"));
        }

        let prefix = self.index_prefix.clone();
        let table = tokio::task::spawn_blocking(move || PathTable::load(&prefix))
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("Index load task panicked: {e}")))??
            .ok_or_else(|| {
                Error::not_found(format!(
                    "No merged index at {}",
                    self.index_prefix.display()
                ))
            })?;

        info!("Query: {text:?} (top {top_k})");
        let response = self.backend.search(text, top_k).await?;
        if response.model_name != table.meta.model_name {
            return Err(Error::config(format!(
                "Query embedding used {} but the merged index was built with {}",
                response.model_name, table.meta.model_name
            )));
        }
        if response.embedding_dim != table.meta.embedding_dim {
            return Err(Error::dimension_mismatch(
                table.meta.embedding_dim,
                response.embedding_dim,
                "query embedding",
            ));
        }

        let mut results = Vec::with_capacity(response.hits.len());
        for hit in &response.hits {
            let path = usize::try_from(hit.id)
                .ok()
                .and_then(|id| table.resolve(id));
            let Some(path) = path else {
                debug!("Skipping invalid id {}", hit.id);
                continue;
            };
            results.push(QueryResult {
                rank: results.len() + 1,
                score: hit.score,
                path: self.mapping.to_local(path),
                copied_to: None,
            });
        }

        let (copied, copy_failed) = if copy_results && !results.is_empty() {
            self.copy_results(&mut results).await?
        } else {
            (0, 0)
        };

        Ok(QueryOutcome {
            model_name: response.model_name,
            results,
            copied,
            copy_failed,
        })
    }

    async fn copy_results(&self, results: &mut [QueryResult]) -> Result<(usize, usize)> {
        tokio::fs::create_dir_all(&self.results_dir).await?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let (mut copied, mut failed) = (0, 0);

        for result in results.iter_mut() {
            let src = Path::new(&result.path);
            if !src.is_file() {
                warn!("Source image not found: {}", src.display());
                failed += 1;
                continue;
            }
            let dest = self
                .results_dir
                .join(result_file_name(&timestamp, result.rank, src));
            match tokio::fs::copy(src, &dest).await {
                Ok(_) => {
                    debug!("Copied rank {} to {}", result.rank, dest.display());
                    result.copied_to = Some(dest);
                    copied += 1;
                }
                Err(e) => {
                    warn!("Failed to copy {}: {e}", src.display());
                    failed += 1;
                }
            }
        }

        info!(
            "Results copied: {copied} succeeded, {failed} failed ({})",
            self.results_dir.display()
        );
        Ok((copied, failed))
    }
}

/// `match_<timestamp>_rank<NNN><.ext>` with the extension lowercased
fn result_file_name(timestamp: &str, rank: usize, src: &Path) -> String {
    let ext = src
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    format!("match_{timestamp}_rank{rank:03}{ext}")
}
