//! Polling started workers until each reaches a terminal state

use crate::dispatch::NodeHandle;
use fleetindex_core::config::MonitorConfig;
use fleetindex_remote::{PollStatus, RemoteExecutor};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// A node that did not succeed, with what it reported
#[derive(Debug, Clone, PartialEq)]
pub struct FailedNode {
    pub node: NodeHandle,
    pub diagnostics: String,
}

/// Terminal classification of every monitored node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorOutcome {
    pub succeeded: Vec<NodeHandle>,
    pub failed: Vec<FailedNode>,
}

impl MonitorOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    /// One line per failed node
    pub fn failure_summary(&self) -> String {
        self.failed
            .iter()
            .map(|f| format!("{}: {}", f.node.node.hostname, f.diagnostics.trim()))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Watches node handles on a fixed interval
pub struct Monitor {
    executor: Arc<dyn RemoteExecutor>,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl Monitor {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            executor,
            poll_interval,
            timeout,
        }
    }

    pub fn from_config(executor: Arc<dyn RemoteExecutor>, config: &MonitorConfig) -> Self {
        let timeout = (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs));
        Self::new(
            executor,
            Duration::from_millis(config.poll_interval_ms),
            timeout,
        )
    }

    /// Polls until every handle is terminal
    ///
    /// `on_progress` receives the total processed count across nodes whenever
    /// it changes. Without a timeout a node that never finishes blocks forever.
    pub async fn run<F>(&self, handles: Vec<NodeHandle>, mut on_progress: F) -> MonitorOutcome
    where
        F: FnMut(usize) + Send,
    {
        let started = Instant::now();
        let mut outcome = MonitorOutcome::default();
        // (handle, last processed count)
        let mut pending: Vec<(NodeHandle, usize)> = handles.into_iter().map(|h| (h, 0)).collect();
        let mut finished_items = 0;
        let mut last_reported = 0;

        loop {
            let mut still_pending = Vec::with_capacity(pending.len());
            for (node, processed) in pending {
                match self.executor.poll(node.handle).await {
                    Ok(PollStatus::Running { processed: seen }) => {
                        let seen = seen.unwrap_or(processed).min(node.items).max(processed);
                        still_pending.push((node, seen));
                    }
                    Ok(PollStatus::Succeeded) => {
                        info!("Worker on {} completed successfully", node.node.hostname);
                        finished_items += node.items;
                        outcome.succeeded.push(node);
                    }
                    Ok(PollStatus::Failed { diagnostics }) => {
                        error!("Worker on {} failed: {}", node.node.hostname, diagnostics.trim());
                        outcome.failed.push(FailedNode { node, diagnostics });
                    }
                    Err(e) => {
                        error!("Lost track of worker on {}: {e}", node.node.hostname);
                        outcome.failed.push(FailedNode {
                            node,
                            diagnostics: e.to_string(),
                        });
                    }
                }
            }
            pending = still_pending;

            let processed = finished_items + pending.iter().map(|(_, p)| *p).sum::<usize>();
            if processed > last_reported {
                last_reported = processed;
                on_progress(processed);
            }

            if pending.is_empty() {
                break;
            }

            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    for (node, _) in pending {
                        warn!(
                            "Worker on {} still running after {}s, giving up",
                            node.node.hostname,
                            limit.as_secs()
                        );
                        if let Err(e) = self.executor.cancel(node.handle).await {
                            warn!("Failed to cancel worker on {}: {e}", node.node.hostname);
                        }
                        outcome.failed.push(FailedNode {
                            node,
                            diagnostics: format!("timed out after {}s", limit.as_secs()),
                        });
                    }
                    break;
                }
            }

            debug!("{} worker(s) still running", pending.len());
            tokio::time::sleep(self.poll_interval).await;
        }

        // Keep node declaration order for the merge
        outcome.succeeded.sort_by_key(|h| h.node.id);
        outcome.failed.sort_by_key(|f| f.node.node.id);
        outcome
    }
}
