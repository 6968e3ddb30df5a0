//! Background drain of the tunnel process output.
//!
//! The child's pipes must be read continuously: once an OS pipe buffer is
//! full the child blocks on its next write. The drain reads every line and
//! keeps the most recent [`OUTPUT_TAIL_LINES`] of them. After the exit
//! status arrives, a failed exit prints that tail and fires the failure
//! signal. The signal is a oneshot sender taken by value,
//! so it can fire at most once per launched process.

use std::collections::VecDeque;
use std::process::ExitStatus;

use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};

use crate::error::SubprocessFailure;

/// Lines of output kept for the failure diagnostic.
pub const OUTPUT_TAIL_LINES: usize = 500;

/// Output line from the tunnel process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutput {
    /// Line from stdout.
    Stdout(String),
    /// Line from stderr.
    Stderr(String),
}

impl ProcessOutput {
    pub fn into_line(self) -> String {
        match self {
            Self::Stdout(line) | Self::Stderr(line) => line,
        }
    }
}

/// How the drain finished.
#[derive(Debug)]
pub enum DrainOutcome {
    /// The process exited successfully; its output was discarded.
    Exited(ExitStatus),
    /// The process exited with a failure status; the signal has fired.
    Failed(SubprocessFailure),
    /// The process was killed on request.
    Interrupted,
    /// The exit status could not be collected.
    WaitFailed(String),
}

pub(super) async fn drain(
    mut child: Child,
    mut rx: mpsc::Receiver<ProcessOutput>,
    failure_tx: oneshot::Sender<SubprocessFailure>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> DrainOutcome {
    let mut output = VecDeque::with_capacity(64);

    loop {
        let next = tokio::select! {
            line = rx.recv() => Some(line),
            _ = &mut shutdown_rx => None,
        };

        match next {
            Some(Some(line)) => {
                match &line {
                    ProcessOutput::Stdout(l) => tracing::trace!(stream = "stdout", "{l}"),
                    ProcessOutput::Stderr(l) => tracing::trace!(stream = "stderr", "{l}"),
                }
                if output.len() == OUTPUT_TAIL_LINES {
                    output.pop_front();
                }
                output.push_back(line.into_line());
            }
            Some(None) => break,
            None => return kill(&mut child).await,
        }
    }

    let status = tokio::select! {
        status = child.wait() => Some(status),
        _ = &mut shutdown_rx => None,
    };

    let status = match status {
        Some(Ok(status)) => status,
        Some(Err(e)) => {
            tracing::warn!("failed to wait for tunnel process: {e}");
            return DrainOutcome::WaitFailed(e.to_string());
        }
        None => return kill(&mut child).await,
    };

    if status.success() {
        tracing::debug!(%status, "tunnel process exited");
        return DrainOutcome::Exited(status);
    }

    let failure = SubprocessFailure {
        status,
        output: Vec::from(output),
    };
    println!("Error: {}", failure.output_string());
    tracing::error!(%status, lines = failure.output.len(), "tunnel process failed");

    // The receiver may already be gone if the session ended; the outcome still carries the failure.
    let _ = failure_tx.send(failure.clone());
    DrainOutcome::Failed(failure)
}

async fn kill(child: &mut Child) -> DrainOutcome {
    if let Err(e) = child.kill().await {
        tracing::warn!("failed to kill tunnel process: {e}");
    }
    tracing::debug!("tunnel process stopped on request");
    DrainOutcome::Interrupted
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::OUTPUT_TAIL_LINES;
    use crate::process::{launch, DrainOutcome, LaunchOptions};

    fn sh(script: &str) -> LaunchOptions {
        LaunchOptions::new("sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_failure_signal_fires_once() {
        let mut process = launch(sh("echo bad authtoken >&2; exit 1")).unwrap();

        let failure = process.failed().await.expect("signal should fire");
        assert_eq!(failure.output, vec!["bad authtoken"]);
        assert!(!failure.status.success());

        // A second wait observes the spent signal instead of a new one.
        assert!(process.failed().await.is_none());
        assert!(matches!(process.wait().await, DrainOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_success_never_fires() {
        let mut process = launch(sh("echo tunnel session closed")).unwrap();

        assert!(process.failed().await.is_none());
        assert!(matches!(process.wait().await, DrainOutcome::Exited(s) if s.success()));
    }

    #[tokio::test]
    async fn test_drains_output_larger_than_pipe_buffer() {
        // Roughly 1 MiB on each stream; blocks forever if nobody reads.
        let mut process = launch(sh(
            "i=0; while [ $i -lt 16384 ]; do \
             echo 0123456789012345678901234567890123456789012345678901234567890123; \
             echo 0123456789012345678901234567890123456789012345678901234567890123 >&2; \
             i=$((i+1)); done; exit 2",
        ))
        .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(30), process.wait())
            .await
            .expect("drain should not deadlock");

        match outcome {
            DrainOutcome::Failed(failure) => {
                assert_eq!(failure.status.code(), Some(2));
                assert_eq!(failure.output.len(), OUTPUT_TAIL_LINES);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_keeps_latest_lines() {
        let mut process = launch(sh(
            "i=0; while [ $i -lt 1000 ]; do echo line-$i; i=$((i+1)); done; exit 1",
        ))
        .unwrap();

        let failure = process.failed().await.expect("signal should fire");
        assert_eq!(failure.output.len(), OUTPUT_TAIL_LINES);
        assert_eq!(failure.output.first().map(String::as_str), Some("line-500"));
        assert_eq!(failure.output.last().map(String::as_str), Some("line-999"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_does_not_close_pipe() {
        let mut process = launch(sh(
            "printf '\\377\\n'; sleep 0.2; \
             i=0; while [ $i -lt 200 ]; do echo after-$i; i=$((i+1)); done; exit 7",
        ))
        .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(10), process.wait())
            .await
            .expect("drain should finish");

        match outcome {
            DrainOutcome::Failed(failure) => {
                assert_eq!(failure.status.code(), Some(7));
                assert_eq!(failure.output.len(), 201);
                assert_eq!(failure.output[0], "\u{FFFD}");
                assert_eq!(failure.output[200], "after-199");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_kills_without_failure() {
        let process = launch(sh("echo started; sleep 30")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome = tokio::time::timeout(Duration::from_secs(5), process.shutdown())
            .await
            .expect("shutdown should be prompt");
        assert!(matches!(outcome, DrainOutcome::Interrupted));
    }
}
