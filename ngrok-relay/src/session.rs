//! One tunnel run: launch, discover, notify, then wait.
//!
//! ```text
//! Idle -> Launching -> AwaitingAddress -> Notifying -> Done
//!            \               \                \
//!             +---------------+----------------+--> Failed
//! ```
//!
//! There is no way back out of `Failed`; the whole session must be re-run.

use std::fmt;
use std::future::Future;

use tracing::Instrument;
use uuid::Uuid;

use crate::config::{Config, NOTIFY_USERNAME};
use crate::credentials::service_config_exists;
use crate::error::{Error, Result};
use crate::notify::Notifier;
use crate::process::{launch, tunnel_args, DrainOutcome, LaunchOptions};
use crate::status::StatusClient;

/// Tunnel protocol passed to ngrok as its subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Tcp,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Launching,
    AwaitingAddress,
    Notifying,
    Done,
    Failed,
}

/// How the tunnel process ended after the address was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// ngrok exited on its own with a success status.
    Exited,
    /// The operator interrupted the run and ngrok was stopped.
    Interrupted,
    /// ngrok is gone but its exit status could not be collected.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub public_url: String,
    pub exit: SessionExit,
}

/// A single launch -> discover -> notify run.
#[derive(Debug)]
pub struct Session<'a> {
    id: Uuid,
    config: &'a Config,
    protocol: Protocol,
    port: String,
    extra_args: Vec<String>,
    webhook_url: String,
    public_url: Option<String>,
    state: SessionState,
}

impl<'a> Session<'a> {
    pub fn new(
        config: &'a Config,
        protocol: Protocol,
        port: impl Into<String>,
        extra_args: Vec<String>,
        webhook_url: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            config,
            protocol,
            port: port.into(),
            extra_args,
            webhook_url: webhook_url.into(),
            public_url: None,
            state: SessionState::Idle,
        }
    }

    #[cfg(test)]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Public URL, once discovered.
    pub fn public_url(&self) -> Option<&str> {
        self.public_url.as_deref()
    }

    /// Run until ngrok exits or the operator presses Ctrl-C.
    pub async fn run(&mut self) -> Result<SessionReport> {
        self.run_until(ctrl_c()).await
    }

    /// Run until ngrok exits or `shutdown` resolves after the address was delivered.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<SessionReport>
    where
        F: Future<Output = ()>,
    {
        let span = tracing::info_span!(
            "session",
            id = %self.id,
            proto = %self.protocol,
            port = %self.port
        );

        let result = self.drive(shutdown).instrument(span).await;
        if let Err(ref e) = result {
            if self.state != SessionState::Done {
                tracing::error!(
                    id = %self.id,
                    from = ?self.state,
                    public_url = ?self.public_url(),
                    "session failed: {e}"
                );
                self.transition(SessionState::Failed);
            }
        }
        result
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    async fn drive<F>(&mut self, shutdown: F) -> Result<SessionReport>
    where
        F: Future<Output = ()>,
    {
        let config = self.config;

        self.transition(SessionState::Launching);
        if !service_config_exists(&config.service_config_path) {
            return Err(Error::ConfigAbsent {
                path: config.service_config_path.clone(),
            });
        }

        let args = tunnel_args(self.protocol.as_str(), &self.port, &self.extra_args);
        let mut process = launch(LaunchOptions::tunnel(
            &config.binary_path,
            &args,
            &config.service_config_path,
        ))?;
        tracing::debug!(pid = ?process.pid, "tunnel process running");

        self.transition(SessionState::AwaitingAddress);
        println!("Checking address...");

        let client = StatusClient::new(config.web_addr, config.poll.request_timeout)?;
        let address = tokio::select! {
            result = client.discover_public_address(&config.selector, &config.poll) => result?,
            Some(failure) = process.failed() => return Err(Error::SubprocessFailure(failure)),
        };
        self.public_url = Some(address.clone());

        self.transition(SessionState::Notifying);
        let notifier = Notifier::new(self.webhook_url.as_str(), NOTIFY_USERNAME)?;
        notifier.notify(&address).await?;
        println!("Public address {address} sent to webhook");

        self.transition(SessionState::Done);

        let outcome = tokio::select! {
            outcome = process.wait() => Some(outcome),
            () = shutdown => None,
        };
        let outcome = match outcome {
            Some(outcome) => outcome,
            None => {
                tracing::info!("stopping tunnel process");
                process.shutdown().await
            }
        };

        let exit = session_exit(outcome)?;

        Ok(SessionReport {
            public_url: address,
            exit,
        })
    }
}

/// Map how the drain finished after delivery to the reported exit.
fn session_exit(outcome: DrainOutcome) -> Result<SessionExit> {
    match outcome {
        DrainOutcome::Failed(failure) => Err(Error::SubprocessFailure(failure)),
        DrainOutcome::Exited(status) => {
            tracing::info!(%status, "tunnel process exited");
            Ok(SessionExit::Exited)
        }
        DrainOutcome::WaitFailed(message) => {
            tracing::warn!("lost track of the tunnel process: {message}");
            Ok(SessionExit::Unknown)
        }
        DrainOutcome::Interrupted => Ok(SessionExit::Interrupted),
    }
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use axum::http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::config::{Platform, PollPolicy};
    use crate::credentials::write_service_config;
    use crate::error::DiscoveryError;
    use crate::test_support::{fast_policy, serve, status_router, unused_port, webhook_receiver, Received};

    const PUBLIC_URL: &str = "https://abc123.ngrok.io";

    fn fake_ngrok(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("ngrok");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn config(dir: &Path, binary: PathBuf, web_addr: u16) -> Config {
        let config = Config::for_platform(Platform::Linux, dir)
            .with_binary_path(binary)
            .with_web_addr(web_addr)
            .with_poll_policy(fast_policy());
        write_service_config(&config.service_config_path, "tok123", web_addr).unwrap();
        config
    }

    async fn single_tunnel_status() -> u16 {
        serve(status_router(json!({
            "tunnels": [{"name": "command_line", "public_url": PUBLIC_URL, "proto": "https"}],
            "uri": "/api/tunnels"
        })))
        .await
        .port()
    }

    async fn webhook() -> (String, Received) {
        let (app, received) = webhook_receiver(StatusCode::NO_CONTENT);
        let addr = serve(app).await;
        (format!("http://{addr}/api/webhooks/1/x"), received)
    }

    #[test]
    fn test_lost_exit_status_is_not_a_clean_exit() {
        let exit = session_exit(DrainOutcome::WaitFailed("drain task failed: panicked".into()));
        assert_eq!(exit.unwrap(), SessionExit::Unknown);
        assert_eq!(
            session_exit(DrainOutcome::Interrupted).unwrap(),
            SessionExit::Interrupted
        );
    }

    #[tokio::test]
    async fn test_end_to_end_posts_public_url_once() {
        let dir = tempfile::tempdir().unwrap();
        let args_file = dir.path().join("args.txt");
        let binary = fake_ngrok(
            dir.path(),
            &format!("echo \"$@\" > {}\nsleep 1", args_file.display()),
        );
        let config = config(dir.path(), binary, single_tunnel_status().await);
        let (url, received) = webhook().await;

        let mut session = Session::new(&config, Protocol::Http, "8080", vec![], url);
        let report = session.run_until(std::future::pending()).await.unwrap();

        assert_eq!(report.public_url, PUBLIC_URL);
        assert_eq!(report.exit, SessionExit::Exited);
        assert_eq!(session.state(), SessionState::Done);
        assert_eq!(session.public_url(), Some(PUBLIC_URL));

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].content, PUBLIC_URL);

        let args = std::fs::read_to_string(&args_file).unwrap();
        assert_eq!(
            args.trim(),
            format!("http 8080 --config {}", config.service_config_path.display())
        );
    }

    #[tokio::test]
    async fn test_interrupt_stops_tunnel() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_ngrok(dir.path(), "sleep 30");
        let config = config(dir.path(), binary, single_tunnel_status().await);
        let (url, received) = webhook().await;

        let watched = received.clone();
        let interrupt = async move {
            while watched.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };

        let mut session = Session::new(&config, Protocol::Tcp, "22", vec![], url);
        let report = tokio::time::timeout(Duration::from_secs(10), session.run_until(interrupt))
            .await
            .expect("interrupt should end the session")
            .unwrap();

        assert_eq!(report.exit, SessionExit::Interrupted);
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_subprocess_failure_during_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_ngrok(dir.path(), "echo 'ERR_NGROK_105: authentication failed' >&2\nexit 1");
        // Keep polling long enough that the exit, not the poll ceiling, ends discovery.
        let config = config(dir.path(), binary, unused_port().await).with_poll_policy(PollPolicy {
            max_attempts: 100,
            ..fast_policy()
        });
        let (url, received) = webhook().await;

        let mut session = Session::new(&config, Protocol::Http, "80", vec![], url);
        let err = session.run_until(std::future::pending()).await.unwrap_err();

        match err {
            Error::SubprocessFailure(failure) => {
                assert_eq!(failure.output, vec!["ERR_NGROK_105: authentication failed"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(session.state(), SessionState::Failed);
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_service_config_refuses_launch() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_platform(Platform::Linux, dir.path())
            .with_poll_policy(fast_policy());
        let (url, received) = webhook().await;

        let mut session = Session::new(&config, Protocol::Http, "80", vec![], url);
        let err = session.run_until(std::future::pending()).await.unwrap_err();

        assert!(matches!(err, Error::ConfigAbsent { .. }));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_tunnel_list_fails_without_notifying() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_ngrok(dir.path(), "sleep 30");
        let status = serve(status_router(json!({"tunnels": [], "uri": "/api/tunnels"}))).await;
        let config = config(dir.path(), binary, status.port());
        let (url, received) = webhook().await;

        let mut session = Session::new(&config, Protocol::Http, "80", vec![], url);
        let err = session.run_until(std::future::pending()).await.unwrap_err();

        assert!(matches!(err, Error::Discovery(DiscoveryError::NoTunnel)));
        assert_eq!(err.exit_code(), 9);
        assert_eq!(session.state(), SessionState::Failed);
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_webhook_is_delivery_failure() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_ngrok(dir.path(), "sleep 30");
        let config = config(dir.path(), binary, single_tunnel_status().await);
        let (app, _received) = webhook_receiver(StatusCode::UNAUTHORIZED);
        let addr = serve(app).await;

        let mut session = Session::new(
            &config,
            Protocol::Http,
            "80",
            vec![],
            format!("http://{addr}/api/webhooks/1/x"),
        );
        let err = session.run_until(std::future::pending()).await.unwrap_err();

        assert_eq!(err.exit_code(), 10);
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.public_url(), Some(PUBLIC_URL));
    }
}
