//! Tunnel binary launching.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::drain::{drain, DrainOutcome, ProcessOutput};
use crate::error::{Error, Result, SubprocessFailure};

/// Options for launching the tunnel binary.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// The program to execute.
    pub program: PathBuf,

    /// Arguments to pass to the program.
    pub args: Vec<String>,

    /// Buffer size for the output channel (default: 1000).
    pub buffer_size: usize,
}

impl LaunchOptions {
    /// Create new options for the given program.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            buffer_size: 1000,
        }
    }

    /// Options for `binary args... --config <config_path>`.
    pub fn tunnel(binary: &Path, args: &[String], config_path: &Path) -> Self {
        Self::new(binary)
            .args(args.iter().cloned())
            .arg("--config")
            .arg(config_path.to_string_lossy())
    }

    /// Add an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

}

/// Subcommand arguments for a tunnel: `<proto> <port> [extra...]`.
pub fn tunnel_args(proto: &str, port: &str, extra: &[String]) -> Vec<String> {
    let mut args = Vec::with_capacity(extra.len() + 2);
    args.push(proto.to_string());
    args.push(port.to_string());
    args.extend(extra.iter().cloned());
    args
}

/// Handle to a running tunnel process and its output drain.
#[derive(Debug)]
pub struct TunnelProcess {
    /// OS process id, if the child was still running when spawned.
    pub pid: Option<u32>,
    failure_rx: Option<oneshot::Receiver<SubprocessFailure>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    drain: JoinHandle<DrainOutcome>,
}

impl TunnelProcess {
    /// Resolve when the drain reports a failed exit.
    ///
    /// Returns `None` if the process ended without failing (or was shut
    /// down). Once resolved, later calls return `None` immediately.
    pub async fn failed(&mut self) -> Option<SubprocessFailure> {
        let rx = self.failure_rx.as_mut()?;
        let failure = rx.await.ok();
        self.failure_rx = None;
        failure
    }

    /// Wait for the process to exit and the drain to finish.
    pub async fn wait(&mut self) -> DrainOutcome {
        match (&mut self.drain).await {
            Ok(outcome) => outcome,
            Err(e) => DrainOutcome::WaitFailed(format!("drain task failed: {e}")),
        }
    }

    /// Kill the process and wait for the drain to finish.
    pub async fn shutdown(mut self) -> DrainOutcome {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.wait().await
    }
}

/// Forward each line of `stream` until EOF.
///
/// Lines are decoded lossily. Only EOF or a read error ends the reader, so
/// the pipe stays open for as long as the child writes to it.
fn spawn_reader<R>(stream: R, tx: mpsc::Sender<ProcessOutput>, wrap: fn(String) -> ProcessOutput)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send(wrap(line)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("failed to read tunnel process output: {e}");
                    break;
                }
            }
        }
    });
}

/// Launch the process and start draining its output in the background.
///
/// Returns as soon as the child is spawned.
pub fn launch(options: LaunchOptions) -> Result<TunnelProcess> {
    let mut cmd = Command::new(&options.program);
    cmd.args(&options.args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| Error::Launch {
        binary: options.program.clone(),
        source,
    })?;

    let pid = child.id();
    tracing::info!(
        program = %options.program.display(),
        args = ?options.args,
        pid,
        "launched tunnel process"
    );

    let (tx, rx) = mpsc::channel::<ProcessOutput>(options.buffer_size);

    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, tx.clone(), ProcessOutput::Stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, tx.clone(), ProcessOutput::Stderr);
    }

    // Drop the original sender so the channel closes when readers finish
    drop(tx);

    let (failure_tx, failure_rx) = oneshot::channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let drain = tokio::spawn(drain(child, rx, failure_tx, shutdown_rx));

    Ok(TunnelProcess {
        pid,
        failure_rx: Some(failure_rx),
        shutdown_tx: Some(shutdown_tx),
        drain,
    })
}
