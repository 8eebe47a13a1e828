//! `ssh`/`scp` backed executor

use crate::executor::{parse_progress, CommandOutput, PollStatus, RemoteExecutor, RemoteHandle};
use async_trait::async_trait;
use dashmap::DashMap;
use fleetindex_core::config::RemoteConfig;
use fleetindex_core::error::{Error, Result};
use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lines of output kept per stream for failure diagnostics
const TAIL_LINES: usize = 40;

/// How long to wait for output readers after the process exits
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// ssh exits with 255 when the connection itself failed
const SSH_CONNECTION_FAILURE: i32 = 255;

#[derive(Default)]
struct ProgressCounter {
    value: AtomicUsize,
    seen: AtomicBool,
}

impl ProgressCounter {
    fn record(&self, done: usize) {
        self.value.fetch_max(done, Ordering::Relaxed);
        self.seen.store(true, Ordering::Relaxed);
    }

    fn get(&self) -> Option<usize> {
        self.seen
            .load(Ordering::Relaxed)
            .then(|| self.value.load(Ordering::Relaxed))
    }
}

type Tail = Arc<Mutex<VecDeque<String>>>;

fn push_tail(tail: &Tail, line: String) {
    let mut lines = tail.lock().unwrap_or_else(|e| e.into_inner());
    if lines.len() == TAIL_LINES {
        lines.pop_front();
    }
    lines.push_back(line);
}

fn join_tail(tail: &Tail) -> String {
    let lines = tail.lock().unwrap_or_else(|e| e.into_inner());
    lines.iter().cloned().collect::<Vec<_>>().join("\n")
}

/// Consecutive read errors after which a stream is given up
const MAX_READ_ERRORS: usize = 3;

/// Drains `stream` to EOF, decoding each line lossily
///
/// The pipe must stay open until the worker exits, otherwise its next write
/// kills it with SIGPIPE.
fn spawn_reader<R>(
    stream: R,
    host: String,
    progress: Arc<ProgressCounter>,
    tail: Tail,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        let mut errors = 0;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    errors = 0;
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    if let Some(done) = parse_progress(line) {
                        progress.record(done);
                    }
                    debug!(host = %host, "{line}");
                    push_tail(&tail, line.to_string());
                }
                Err(e) => {
                    errors += 1;
                    warn!(host = %host, "Failed to read worker output: {e}");
                    if errors >= MAX_READ_ERRORS {
                        break;
                    }
                }
            }
        }
    })
}

struct TrackedProcess {
    host: String,
    child: Child,
    progress: Arc<ProgressCounter>,
    stdout_tail: Tail,
    stderr_tail: Tail,
    readers: Vec<JoinHandle<()>>,
}

impl TrackedProcess {
    async fn finish(self, exit: std::io::Result<ExitStatus>) -> PollStatus {
        for reader in self.readers {
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
                warn!(host = %self.host, "Output reader did not finish after exit");
            }
        }

        let status = match exit {
            Ok(status) => status,
            Err(e) => {
                return PollStatus::Failed {
                    diagnostics: format!("Failed to observe process: {e}"),
                }
            }
        };

        if status.success() {
            return PollStatus::Succeeded;
        }

        let mut output = join_tail(&self.stderr_tail);
        if output.trim().is_empty() {
            output = join_tail(&self.stdout_tail);
        }
        let reason = match status.code() {
            Some(SSH_CONNECTION_FAILURE) => "connection to node failed".to_string(),
            Some(code) => format!("exited with status {code}"),
            None => "terminated by signal".to_string(),
        };
        PollStatus::Failed {
            diagnostics: if output.trim().is_empty() {
                reason
            } else {
                format!("{reason}\n{output}")
            },
        }
    }
}

/// Executor that reaches nodes with the system `ssh` and `scp` clients
///
/// Started commands run as local `ssh` child processes, so a handle stays
/// observable for as long as this executor lives.
pub struct SshExecutor {
    user: String,
    options: Vec<String>,
    ssh_command: Vec<String>,
    scp_command: Vec<String>,
    processes: DashMap<u64, TrackedProcess>,
    next_id: AtomicU64,
}

impl SshExecutor {
    pub fn new(user: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            user: user.into(),
            options,
            ssh_command: vec!["ssh".to_string()],
            scp_command: vec!["scp".to_string()],
            processes: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(config.user.clone(), config.ssh_options.clone())
    }

    /// Replace the `ssh` and `scp` programs (each may carry leading arguments)
    pub fn with_commands(mut self, ssh: Vec<String>, scp: Vec<String>) -> Self {
        if !ssh.is_empty() {
            self.ssh_command = ssh;
        }
        if !scp.is_empty() {
            self.scp_command = scp;
        }
        self
    }

    fn destination(&self, host: &str) -> String {
        if self.user.is_empty() {
            host.to_string()
        } else {
            format!("{}@{host}", self.user)
        }
    }

    fn ssh(&self, host: &str, command: &str) -> Command {
        let mut cmd = Command::new(&self.ssh_command[0]);
        cmd.args(&self.ssh_command[1..])
            .args(&self.options)
            .arg(self.destination(host))
            .arg(command)
            .stdin(Stdio::null());
        cmd
    }

    /// Number of started processes not yet observed as finished
    pub fn outstanding(&self) -> usize {
        self.processes.len()
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn push(&self, host: &str, local: &Path, remote_dest: &str) -> Result<()> {
        let target = format!("{}:{remote_dest}", self.destination(host));
        debug!(host, local = %local.display(), remote_dest, "Pushing file");

        let output = Command::new(&self.scp_command[0])
            .args(&self.scp_command[1..])
            .args(&self.options)
            .arg(local)
            .arg(&target)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::transfer(host, format!("Failed to launch scp: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::transfer(
                host,
                format!(
                    "Copy of {} to {target} failed: {}",
                    local.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ))
        }
    }

    async fn start(&self, host: &str, command: &str) -> Result<RemoteHandle> {
        let mut child = self
            .ssh(host, command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::remote_execution(host, format!("Failed to launch ssh: {e}")))?;

        let progress = Arc::new(ProgressCounter::default());
        let stdout_tail: Tail = Arc::default();
        let stderr_tail: Tail = Arc::default();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(
                stdout,
                host.to_string(),
                Arc::clone(&progress),
                Arc::clone(&stdout_tail),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(
                stderr,
                host.to_string(),
                Arc::clone(&progress),
                Arc::clone(&stderr_tail),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.processes.insert(
            id,
            TrackedProcess {
                host: host.to_string(),
                child,
                progress,
                stdout_tail,
                stderr_tail,
                readers,
            },
        );

        let handle = RemoteHandle(id);
        info!(host, %handle, "Started remote process");
        Ok(handle)
    }

    async fn poll(&self, handle: RemoteHandle) -> Result<PollStatus> {
        let exit = {
            let mut entry = self
                .processes
                .get_mut(&handle.0)
                .ok_or_else(|| Error::not_found(format!("Unknown remote handle {handle}")))?;
            match entry.child.try_wait() {
                Ok(None) => {
                    return Ok(PollStatus::Running {
                        processed: entry.progress.get(),
                    })
                }
                Ok(Some(status)) => Ok(status),
                Err(e) => Err(e),
            }
        };

        let (_, process) = self
            .processes
            .remove(&handle.0)
            .ok_or_else(|| Error::not_found(format!("Unknown remote handle {handle}")))?;
        Ok(process.finish(exit).await)
    }

    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput> {
        let output = self
            .ssh(host, command)
            .output()
            .await
            .map_err(|e| Error::connectivity(host, format!("Failed to launch ssh: {e}")))?;

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if result.exit_code == Some(SSH_CONNECTION_FAILURE) {
            return Err(Error::connectivity(host, result.stderr.trim().to_string()));
        }
        Ok(result)
    }

    async fn cancel(&self, handle: RemoteHandle) -> Result<()> {
        let Some((_, mut process)) = self.processes.remove(&handle.0) else {
            debug!(%handle, "Cancel requested for a finished process");
            return Ok(());
        };
        warn!(host = %process.host, %handle, "Cancelling remote process");
        process
            .child
            .kill()
            .await
            .map_err(|e| Error::remote_execution(&process.host, format!("Failed to cancel: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_includes_user() {
        let executor = SshExecutor::new("root", Vec::new());
        assert_eq!(executor.destination("gpu-1"), "root@gpu-1");

        let executor = SshExecutor::new("", Vec::new());
        assert_eq!(executor.destination("gpu-1"), "gpu-1");
    }

    #[test]
    fn test_progress_counter_keeps_maximum() {
        let counter = ProgressCounter::default();
        assert_eq!(counter.get(), None);
        counter.record(10);
        counter.record(4);
        assert_eq!(counter.get(), Some(10));
    }

    #[test]
    fn test_tail_is_bounded() {
        let tail: Tail = Arc::default();
        for i in 0..(TAIL_LINES + 5) {
            push_tail(&tail, format!("line {i}"));
        }
        let joined = join_tail(&tail);
        assert!(!joined.contains("line 4\n"));
        assert!(joined.ends_with(&format!("line {}", TAIL_LINES + 4)));
    }

    #[tokio::test]
    async fn test_poll_unknown_handle() {
        let executor = SshExecutor::new("root", Vec::new());
        let err = executor.poll(RemoteHandle(99)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
