//! Error types for ngrok-relay.
//!
//! Every fatal condition of a session maps to one variant here, and every
//! variant maps to a distinct process exit code.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Result type alias using the relay [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while discovering the public tunnel address.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The status API could not be reached, timed out, or answered non-2xx.
    #[error("status API request failed: {0}")]
    Transport(String),

    /// The status API answered with a body that is not the expected JSON.
    #[error("status API returned an unreadable payload: {0}")]
    Decode(String),

    /// The status API reported no tunnels at all.
    #[error("status API reports no active tunnels")]
    NoTunnel,

    /// Tunnels exist, but none matches the configured selector.
    #[error("no active tunnel matches {selector} ({available} tunnel(s) reported)")]
    NoMatchingTunnel { selector: String, available: usize },
}

impl DiscoveryError {
    /// Whether another attempt may succeed once the service finishes starting.
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}

/// Errors raised while delivering the webhook notification.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The webhook endpoint could not be reached.
    #[error("webhook request failed: {0}")]
    Transport(String),

    /// The webhook endpoint answered with a non-success status.
    #[error("webhook rejected the notification with {status}: {body}")]
    Status { status: u16, body: String },
}

/// Output captured from a subprocess that exited unsuccessfully.
#[derive(Debug, Clone)]
pub struct SubprocessFailure {
    pub status: ExitStatus,
    pub output: Vec<String>,
}

impl SubprocessFailure {
    /// Collected output as one block of text.
    pub fn output_string(&self) -> String {
        self.output.join("\n")
    }
}

/// Top-level error for a relay invocation.
#[derive(Debug, Error)]
pub enum Error {
    /// The host OS has no known binary/config layout.
    #[error("Your OS ({os}) is not supported.")]
    UnsupportedPlatform { os: String },

    /// A secret was missing or invalid; it has been written and the tool must be re-run.
    #[error("Saved new {label} to {}. Run the command again to start the tunnel.", .path.display())]
    MissingCredentials { label: &'static str, path: PathBuf },

    /// The generated service config is missing.
    #[error("No config file at {}. Please add your authtoken by using the --configure command", .path.display())]
    ConfigAbsent { path: PathBuf },

    /// The tunnel binary could not be started.
    #[error("Failed to start {}: {source}", .binary.display())]
    Launch {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The tunnel binary exited with a failure status.
    #[error("tunnel process exited with {}", .0.status)]
    SubprocessFailure(SubprocessFailure),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// Interactive input could not be read.
    #[error("Failed to read input: {0}")]
    Prompt(String),

    /// I/O error on one of the relay's files.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Process exit code for this failure.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Prompt(_) | Self::Io { .. } => 1,
            Self::MissingCredentials { .. } => 3,
            Self::ConfigAbsent { .. } => 4,
            Self::Launch { .. } => 5,
            Self::SubprocessFailure(_) => 6,
            Self::Discovery(DiscoveryError::Transport(_)) => 7,
            Self::Discovery(DiscoveryError::Decode(_)) => 8,
            Self::Discovery(DiscoveryError::NoTunnel | DiscoveryError::NoMatchingTunnel { .. }) => 9,
            Self::Delivery(_) => 10,
            Self::UnsupportedPlatform { .. } => 66,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
