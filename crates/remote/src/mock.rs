//! Scripted executor for tests and dry runs

use crate::executor::{CommandOutput, PollStatus, RemoteExecutor, RemoteHandle};
use async_trait::async_trait;
use dashmap::DashMap;
use fleetindex_core::error::{Error, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type StartHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// How a mock node behaves
#[derive(Debug, Clone)]
pub struct HostScript {
    unreachable: bool,
    fail_push: bool,
    fail_start: bool,
    polls: Vec<PollStatus>,
    run_output: CommandOutput,
}

impl Default for HostScript {
    fn default() -> Self {
        Self::succeeding()
    }
}

impl HostScript {
    /// Finishes successfully on the first poll
    pub fn succeeding() -> Self {
        Self {
            unreachable: false,
            fail_push: false,
            fail_start: false,
            polls: vec![PollStatus::Succeeded],
            run_output: CommandOutput {
                exit_code: Some(0),
                ..CommandOutput::default()
            },
        }
    }

    /// Exits non-zero on the first poll with `diagnostics`
    pub fn failing(diagnostics: impl Into<String>) -> Self {
        Self {
            polls: vec![PollStatus::Failed {
                diagnostics: diagnostics.into(),
            }],
            ..Self::succeeding()
        }
    }

    /// Never finishes
    pub fn hanging() -> Self {
        Self {
            polls: vec![PollStatus::Running { processed: None }],
            ..Self::succeeding()
        }
    }

    /// Every operation fails as if the node were down
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::succeeding()
        }
    }

    /// File transfers to this node fail
    pub fn push_fails(mut self) -> Self {
        self.fail_push = true;
        self
    }

    /// Process launch on this node fails
    pub fn start_fails(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Report these progress counts on successive polls before the final status
    pub fn with_progress(mut self, counts: &[usize]) -> Self {
        let last = self.polls.pop();
        self.polls = counts
            .iter()
            .map(|&n| PollStatus::Running { processed: Some(n) })
            .collect();
        self.polls.extend(last);
        self
    }

    /// Output returned by synchronous commands
    pub fn with_run_output(mut self, output: CommandOutput) -> Self {
        self.run_output = output;
        self
    }
}

struct MockProcess {
    host: String,
    polls: VecDeque<PollStatus>,
}

/// A file transfer observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRecord {
    pub host: String,
    pub local: PathBuf,
    pub remote_dest: String,
}

/// Executor whose nodes follow [`HostScript`]s
///
/// Hosts without a script succeed immediately. Every call is recorded so tests
/// can assert on what was transferred, started and cancelled.
#[derive(Default)]
pub struct MockExecutor {
    scripts: DashMap<String, HostScript>,
    processes: DashMap<u64, MockProcess>,
    next_id: AtomicU64,
    pushes: Mutex<Vec<PushRecord>>,
    started: Mutex<Vec<(String, String)>>,
    commands: Mutex<Vec<(String, String)>>,
    cancelled: Mutex<Vec<String>>,
    on_start: Option<StartHook>,
}

fn record<T>(log: &Mutex<Vec<T>>, entry: T) {
    log.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
}

fn snapshot<T: Clone>(log: &Mutex<Vec<T>>) -> Vec<T> {
    log.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(self, host: impl Into<String>, script: HostScript) -> Self {
        self.scripts.insert(host.into(), script);
        self
    }

    /// Called with `(host, command)` for every successful start
    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(hook));
        self
    }

    fn script(&self, host: &str) -> HostScript {
        self.scripts
            .get(host)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    pub fn pushes(&self) -> Vec<PushRecord> {
        snapshot(&self.pushes)
    }

    /// `(host, command)` pairs passed to `start`
    pub fn started(&self) -> Vec<(String, String)> {
        snapshot(&self.started)
    }

    /// `(host, command)` pairs passed to `run`
    pub fn commands(&self) -> Vec<(String, String)> {
        snapshot(&self.commands)
    }

    /// Hosts whose processes were cancelled
    pub fn cancelled(&self) -> Vec<String> {
        snapshot(&self.cancelled)
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn push(&self, host: &str, local: &Path, remote_dest: &str) -> Result<()> {
        let script = self.script(host);
        if script.unreachable {
            return Err(Error::connectivity(host, "host unreachable"));
        }
        if script.fail_push {
            return Err(Error::transfer(host, format!("copy to {remote_dest} refused")));
        }
        record(
            &self.pushes,
            PushRecord {
                host: host.to_string(),
                local: local.to_path_buf(),
                remote_dest: remote_dest.to_string(),
            },
        );
        Ok(())
    }

    async fn start(&self, host: &str, command: &str) -> Result<RemoteHandle> {
        let script = self.script(host);
        if script.unreachable {
            return Err(Error::connectivity(host, "host unreachable"));
        }
        if script.fail_start {
            return Err(Error::remote_execution(host, "launch refused"));
        }
        record(&self.started, (host.to_string(), command.to_string()));
        if let Some(hook) = &self.on_start {
            hook(host, command);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.processes.insert(
            id,
            MockProcess {
                host: host.to_string(),
                polls: script.polls.into(),
            },
        );
        Ok(RemoteHandle(id))
    }

    async fn poll(&self, handle: RemoteHandle) -> Result<PollStatus> {
        let mut process = self
            .processes
            .get_mut(&handle.0)
            .ok_or_else(|| Error::not_found(format!("Unknown remote handle {handle}")))?;
        let status = if process.polls.len() > 1 {
            process.polls.pop_front()
        } else {
            process.polls.front().cloned()
        };
        Ok(status.unwrap_or(PollStatus::Succeeded))
    }

    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput> {
        let script = self.script(host);
        if script.unreachable {
            return Err(Error::connectivity(host, "host unreachable"));
        }
        record(&self.commands, (host.to_string(), command.to_string()));
        Ok(script.run_output)
    }

    async fn cancel(&self, handle: RemoteHandle) -> Result<()> {
        if let Some((_, process)) = self.processes.remove(&handle.0) {
            record(&self.cancelled, process.host);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_then_success() {
        let executor =
            MockExecutor::new().with_host("a", HostScript::succeeding().with_progress(&[3, 7]));
        let handle = executor.start("a", "work").await.expect("start");

        assert_eq!(
            executor.poll(handle).await.expect("poll"),
            PollStatus::Running { processed: Some(3) }
        );
        assert_eq!(
            executor.poll(handle).await.expect("poll"),
            PollStatus::Running { processed: Some(7) }
        );
        assert_eq!(executor.poll(handle).await.expect("poll"), PollStatus::Succeeded);
        assert_eq!(executor.poll(handle).await.expect("poll"), PollStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_unscripted_host_succeeds() {
        let executor = MockExecutor::new();
        let handle = executor.start("anywhere", "work").await.expect("start");
        assert_eq!(executor.poll(handle).await.expect("poll"), PollStatus::Succeeded);
        assert_eq!(executor.started().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_modes() {
        let executor = MockExecutor::new()
            .with_host("down", HostScript::unreachable())
            .with_host("full", HostScript::succeeding().push_fails());

        let err = executor
            .push("down", Path::new("/tmp/x"), "/root/x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connectivity { .. }));

        let err = executor
            .push("full", Path::new("/tmp/x"), "/root/x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transfer { .. }));
        assert!(executor.pushes().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_dir_runs_mkdir() {
        let executor = MockExecutor::new();
        executor
            .ensure_dir("a", "/root/work dir")
            .await
            .expect("ensure_dir");
        assert_eq!(
            executor.commands(),
            vec![("a".to_string(), "mkdir -p '/root/work dir'".to_string())]
        );
    }

    #[tokio::test]
    async fn test_cancel_records_host() {
        let executor = MockExecutor::new().with_host("a", HostScript::hanging());
        let handle = executor.start("a", "work").await.expect("start");
        executor.cancel(handle).await.expect("cancel");
        assert_eq!(executor.cancelled(), vec!["a".to_string()]);
        assert!(executor.poll(handle).await.is_err());
    }
}
