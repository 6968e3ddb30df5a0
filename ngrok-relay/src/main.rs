//! ngrok-relay - Start an ngrok tunnel and relay its public URL to a webhook.
//!
//! Architecture:
//! - The ngrok binary runs as a child process; its output is drained on a
//!   background task so a full pipe can never stall it
//! - The main task polls ngrok's local status API until a tunnel appears
//! - The first matching public URL is posted once to a Discord webhook
//! - Secrets live in flat files next to the binary and are set up interactively

mod cli;
mod config;
mod credentials;
mod error;
mod logging;
mod notify;
mod process;
mod session;
mod status;

#[cfg(test)]
mod test_support;

use std::process::ExitCode;

use clap::Parser;

use cli::{execute, exit_code, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(logging::default_filter(cli.verbose), cli.log_json);

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<error::Error>() {
                Some(err) if matches!(err, error::Error::MissingCredentials { .. }) => {
                    println!("{err}");
                }
                _ => {
                    tracing::error!("{e:#}");
                    eprintln!("Error: {e:#}");
                }
            }
            ExitCode::from(exit_code(&e))
        }
    }
}
