//! Exercises `SshExecutor` against local stand-ins for `ssh` and `scp`
#![cfg(unix)]

use fleetindex_core::Error;
use fleetindex_remote::{PollStatus, RemoteExecutor, RemoteHandle, SshExecutor};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// Runs the command argument locally, ignoring the destination
const FAKE_SSH: &str = "shift\nexec sh -c \"$1\"\n";

/// Copies to the path part of `host:path`
const FAKE_SCP: &str = "cp \"$1\" \"${2#*:}\"\n";

fn fake_executor(dir: &TempDir) -> SshExecutor {
    let ssh = dir.path().join("fake_ssh.sh");
    let scp = dir.path().join("fake_scp.sh");
    std::fs::write(&ssh, FAKE_SSH).expect("write fake ssh");
    std::fs::write(&scp, FAKE_SCP).expect("write fake scp");
    SshExecutor::new("root", Vec::new()).with_commands(
        vec!["sh".to_string(), ssh.display().to_string()],
        vec!["sh".to_string(), scp.display().to_string()],
    )
}

async fn wait_terminal(executor: &SshExecutor, handle: RemoteHandle) -> PollStatus {
    for _ in 0..500 {
        let status = executor.poll(handle).await.expect("poll");
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("process did not finish");
}

#[tokio::test]
async fn test_run_captures_output() {
    let dir = TempDir::new().expect("tempdir");
    let executor = fake_executor(&dir);

    let output = executor
        .run("node-a", "echo hello; echo oops >&2")
        .await
        .expect("run");
    assert!(output.success());
    assert_eq!(output.stdout.trim(), "hello");
    assert_eq!(output.stderr.trim(), "oops");
}

#[tokio::test]
async fn test_run_connection_failure_is_connectivity_error() {
    let dir = TempDir::new().expect("tempdir");
    let executor = fake_executor(&dir);

    let err = executor.run("node-a", "exit 255").await.unwrap_err();
    assert!(matches!(err, Error::Connectivity { .. }));
}

#[tokio::test]
async fn test_started_process_succeeds() {
    let dir = TempDir::new().expect("tempdir");
    let executor = fake_executor(&dir);

    let handle = executor
        .start(
            "node-a",
            "echo 'Progress: 3/4 images'; sleep 0.1; echo 'Progress: 4/4 images'",
        )
        .await
        .expect("start");

    assert_eq!(wait_terminal(&executor, handle).await, PollStatus::Succeeded);
    assert_eq!(executor.outstanding(), 0);
}

#[tokio::test]
async fn test_started_process_failure_carries_stderr() {
    let dir = TempDir::new().expect("tempdir");
    let executor = fake_executor(&dir);

    let handle = executor
        .start("node-b", "echo 'CUDA out of memory' >&2; exit 3")
        .await
        .expect("start");

    match wait_terminal(&executor, handle).await {
        PollStatus::Failed { diagnostics } => {
            assert!(diagnostics.contains("exited with status 3"));
            assert!(diagnostics.contains("CUDA out of memory"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

/// Latin-1 file name followed by enough output to fill the pipe buffer
const NON_UTF8_WORKER: &str = "printf 'Processing caf\\351.jpg\\n'; \
    i=0; while [ $i -lt 5000 ]; do echo \"Progress: $i/5000 images\"; i=$((i+1)); done";

#[tokio::test]
async fn test_non_utf8_output_does_not_stop_reading() {
    let dir = TempDir::new().expect("tempdir");
    let executor = fake_executor(&dir);

    let handle = executor
        .start("node-a", NON_UTF8_WORKER)
        .await
        .expect("start");

    assert_eq!(wait_terminal(&executor, handle).await, PollStatus::Succeeded);
}

#[tokio::test]
async fn test_non_utf8_diagnostics_are_decoded_lossily() {
    let dir = TempDir::new().expect("tempdir");
    let executor = fake_executor(&dir);

    let handle = executor
        .start("node-b", "printf 'cannot open caf\\351.jpg\\n' >&2; exit 2")
        .await
        .expect("start");

    match wait_terminal(&executor, handle).await {
        PollStatus::Failed { diagnostics } => {
            assert!(diagnostics.contains("exited with status 2"));
            assert!(diagnostics.contains("cannot open caf\u{FFFD}.jpg"), "{diagnostics}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_push_and_ensure_dir() {
    let dir = TempDir::new().expect("tempdir");
    let executor = fake_executor(&dir);

    let remote_dir = dir.path().join("remote/work");
    executor
        .ensure_dir("node-a", &remote_dir.display().to_string())
        .await
        .expect("ensure_dir");
    assert!(remote_dir.is_dir());

    let local = dir.path().join("list.txt");
    std::fs::write(&local, "/images/a.jpg\n").expect("write manifest");
    let dest = remote_dir.join("list.txt");
    executor
        .push("node-a", &local, &dest.display().to_string())
        .await
        .expect("push");
    assert_eq!(
        std::fs::read_to_string(&dest).expect("read pushed file"),
        "/images/a.jpg\n"
    );
}

#[tokio::test]
async fn test_push_failure_is_transfer_error() {
    let dir = TempDir::new().expect("tempdir");
    let executor = fake_executor(&dir);

    let err = executor
        .push(
            "node-a",
            Path::new("/definitely/not/here.txt"),
            &dir.path().join("x").display().to_string(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transfer { .. }));
}

#[tokio::test]
async fn test_cancel_stops_tracking() {
    let dir = TempDir::new().expect("tempdir");
    let executor = fake_executor(&dir);

    let handle = executor.start("node-a", "sleep 30").await.expect("start");
    assert!(matches!(
        executor.poll(handle).await.expect("poll"),
        PollStatus::Running { .. }
    ));

    executor.cancel(handle).await.expect("cancel");
    assert!(executor.poll(handle).await.is_err());
}
