//! Immutable runtime configuration.
//!
//! A [`Config`] is resolved once by the CLI and handed by reference to every
//! component that needs a path, a port, or a polling knob.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default port of the ngrok web interface / status API.
pub const DEFAULT_WEB_ADDR: u16 = 6075;

/// Display name used for webhook notifications.
pub const NOTIFY_USERNAME: &str = "Ngrok";

const SERVICE_CONFIG_FILE: &str = "ngrok.yml";
const WEBHOOK_FILE: &str = "wrapper.conf";

/// Host platform, which decides the binary name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Windows,
}

impl Platform {
    /// Detect the running platform.
    pub fn current() -> Result<Self> {
        Self::from_os(std::env::consts::OS)
    }

    /// Map an OS name (as in `std::env::consts::OS`) to a platform.
    pub fn from_os(os: &str) -> Result<Self> {
        match os {
            "linux" => Ok(Self::Linux),
            "windows" => Ok(Self::Windows),
            other => Err(Error::UnsupportedPlatform {
                os: other.to_string(),
            }),
        }
    }

    /// File name of the ngrok binary on this platform.
    pub const fn binary_name(self) -> &'static str {
        match self {
            Self::Linux => "ngrok",
            Self::Windows => "ngrok.exe",
        }
    }
}

/// Explicit first-match rule for picking a tunnel out of the status API.
///
/// Every filter that is set must match; the first tunnel in payload order
/// that passes wins. With no filters the first tunnel wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelSelector {
    pub name: Option<String>,
    pub proto: Option<String>,
}

impl TunnelSelector {
    pub const fn is_any(&self) -> bool {
        self.name.is_none() && self.proto.is_none()
    }
}

impl fmt::Display for TunnelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, &self.proto) {
            (None, None) => write!(f, "any tunnel"),
            (Some(name), None) => write!(f, "name={name}"),
            (None, Some(proto)) => write!(f, "proto={proto}"),
            (Some(name), Some(proto)) => write!(f, "name={name}, proto={proto}"),
        }
    }
}

/// Readiness polling policy for the status API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay before the first request.
    pub warmup: Duration,
    /// Timeout of a single HTTP request.
    pub request_timeout: Duration,
    /// Delay after the first failed attempt; doubles on each retry.
    pub initial_backoff: Duration,
    /// Upper bound for a single backoff delay.
    pub max_backoff: Duration,
    pub max_attempts: u32,
    /// Ceiling on the whole discovery, warm-up included.
    pub total_timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(3),
            request_timeout: Duration::from_secs(3),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
            max_attempts: 8,
            total_timeout: Duration::from_secs(30),
        }
    }
}

impl PollPolicy {
    /// Backoff to sleep after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << shift)
            .min(self.max_backoff)
    }
}

/// Resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub platform: Platform,
    /// Path of the ngrok executable.
    pub binary_path: PathBuf,
    /// Generated ngrok config passed via `--config`.
    pub service_config_path: PathBuf,
    /// File holding the webhook URL.
    pub webhook_path: PathBuf,
    /// Port of the local status API (`web_addr` in the service config).
    pub web_addr: u16,
    pub poll: PollPolicy,
    pub selector: TunnelSelector,
}

impl Config {
    /// Build the default layout rooted at `base_dir` for `platform`.
    pub fn for_platform(platform: Platform, base_dir: &Path) -> Self {
        Self {
            platform,
            binary_path: base_dir.join(platform.binary_name()),
            service_config_path: base_dir.join(SERVICE_CONFIG_FILE),
            webhook_path: base_dir.join(WEBHOOK_FILE),
            web_addr: DEFAULT_WEB_ADDR,
            poll: PollPolicy::default(),
            selector: TunnelSelector::default(),
        }
    }

    /// Detect the platform and build the default layout rooted at `base_dir`.
    pub fn detect(base_dir: &Path) -> Result<Self> {
        Ok(Self::for_platform(Platform::current()?, base_dir))
    }

    #[must_use]
    pub fn with_binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = path.into();
        self
    }

    #[must_use]
    pub const fn with_web_addr(mut self, port: u16) -> Self {
        self.web_addr = port;
        self
    }

    #[must_use]
    pub fn with_selector(mut self, selector: TunnelSelector) -> Self {
        self.selector = selector;
        self
    }

    #[cfg(test)]
    #[must_use]
    pub const fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }
}
