//! Tracing subscriber setup.
//!
//! Logs go to stderr so they never interleave with prompts and operator
//! messages on stdout.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter for a `-v` count.
pub const fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "ngrok_relay=warn",
        1 => "ngrok_relay=info",
        2 => "ngrok_relay=debug",
        _ => "ngrok_relay=trace",
    }
}

/// Install the stderr subscriber for this run.
///
/// `RUST_LOG` takes precedence over `default_filter`. With `log_json` each
/// event is written as one JSON object per line.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(env_filter);

    if log_json {
        registry.with(fmt_layer.json()).init();
    } else {
        registry.with(fmt_layer).init();
    }
}
