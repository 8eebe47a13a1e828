//! Trait definition for remote executors

use async_trait::async_trait;
use fleetindex_core::error::{Error, Result};
use std::fmt;
use std::path::Path;

/// Opaque handle to a process started on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteHandle(pub(crate) u64);

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote-{}", self.0)
    }
}

/// State of a started process as observed by one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// Still running; `processed` is the last progress count the worker reported
    Running { processed: Option<usize> },
    /// Exited with status zero
    Succeeded,
    /// Exited non-zero, was killed, or could not be observed
    Failed { diagnostics: String },
}

impl PollStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollStatus::Running { .. })
    }
}

/// Output of a synchronous remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Transport used to reach compute nodes
///
/// Implementations move files to a node, start detached processes there and
/// report on them when polled. Polling never blocks on the remote process.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Copy a local file to `remote_dest` on `host`
    async fn push(&self, host: &str, local: &Path, remote_dest: &str) -> Result<()>;

    /// Start `command` on `host` without waiting for it
    async fn start(&self, host: &str, command: &str) -> Result<RemoteHandle>;

    /// Observe a started process
    async fn poll(&self, handle: RemoteHandle) -> Result<PollStatus>;

    /// Run `command` on `host` and wait for its output
    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput>;

    /// Stop a started process
    async fn cancel(&self, handle: RemoteHandle) -> Result<()>;

    /// Create `dir` on `host` if it does not exist
    async fn ensure_dir(&self, host: &str, dir: &str) -> Result<()> {
        let output = self
            .run(host, &format!("mkdir -p {}", shell_quote(dir)))
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(Error::remote_execution(
                host,
                format!("Failed to create {dir}: {}", output.stderr.trim()),
            ))
        }
    }
}

/// Quotes `s` for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Parses a worker progress line of the form `Progress: <done>/<total> ...`
pub fn parse_progress(line: &str) -> Option<usize> {
    let rest = &line[line.find("Progress:")? + "Progress:".len()..];
    let (done, _) = rest.trim_start().split_once('/')?;
    done.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/root/work/list.txt"), "/root/work/list.txt");
        assert_eq!(shell_quote("my images"), "'my images'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_parse_progress() {
        assert_eq!(parse_progress("Progress: 120/500 images"), Some(120));
        assert_eq!(
            parse_progress("[worker 1] Progress:  8/16 images (2.1 img/s)"),
            Some(8)
        );
        assert_eq!(parse_progress("Loading model clip-ViT-L-14"), None);
        assert_eq!(parse_progress("Progress: ?/500"), None);
    }

    #[test]
    fn test_poll_status_terminal() {
        assert!(!PollStatus::Running { processed: None }.is_terminal());
        assert!(PollStatus::Succeeded.is_terminal());
        assert!(PollStatus::Failed {
            diagnostics: String::new()
        }
        .is_terminal());
    }
}
