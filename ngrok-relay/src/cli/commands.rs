//! CLI command execution.

use anyhow::{Context, Result};
use clap::CommandFactory;

use crate::config::Config;
use crate::credentials::{self, Prompter, TerminalPrompter};
use crate::error::Error;
use crate::session::{Protocol, Session, SessionExit};

use super::args::{Cli, Commands};

/// Resolve the runtime configuration from parsed arguments.
pub fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::detect(&cli.dir)?
        .with_web_addr(cli.web_addr)
        .with_selector(cli.selector());

    if let Some(ref ngrok) = cli.ngrok {
        config = config.with_binary_path(ngrok);
    }

    if !config.selector.is_any() {
        tracing::info!(selector = %config.selector, "restricting tunnel selection");
    }
    tracing::debug!(platform = ?config.platform, ?config, "resolved configuration");
    Ok(config)
}

fn print_help() -> Result<()> {
    Cli::command().print_help().context("Failed to print help")?;
    println!();
    Ok(())
}

// === Command Execution ===

pub async fn execute(cli: Cli) -> Result<()> {
    execute_with(cli, &mut TerminalPrompter).await
}

async fn execute_with(cli: Cli, prompter: &mut dyn Prompter) -> Result<()> {
    let config = resolve_config(&cli)?;

    if cli.configure {
        return credentials::configure(&config, prompter).context("Configuration failed");
    }

    match cli.command {
        Some(Commands::Http { port, extra }) => {
            start_tunnel(&config, Protocol::Http, port, extra, prompter).await
        }
        Some(Commands::Tcp { port, extra }) => {
            start_tunnel(&config, Protocol::Tcp, port, extra, prompter).await
        }
        Some(Commands::External(args)) => {
            let name = args.first().map_or("", String::as_str);
            let run = prompter.confirm(&format!(
                "Could not find command {name}, do you want to execute it using ngrok?"
            ))?;
            if run {
                println!("Not implemented yet...");
                Ok(())
            } else {
                print_help()
            }
        }
        None => print_help(),
    }
}

async fn start_tunnel(
    config: &Config,
    protocol: Protocol,
    port: String,
    extra: Vec<String>,
    prompter: &mut dyn Prompter,
) -> Result<()> {
    // Checked before the webhook so a missing config is reported whatever the credential state.
    if !credentials::service_config_exists(&config.service_config_path) {
        return Err(Error::ConfigAbsent {
            path: config.service_config_path.clone(),
        }
        .into());
    }

    let webhook_url = credentials::load_webhook_url(config, prompter)?;

    let mut session = Session::new(config, protocol, port, extra, webhook_url);
    let report = session.run().await?;

    match report.exit {
        SessionExit::Exited => println!("ngrok exited."),
        SessionExit::Interrupted => println!("Tunnel for {} stopped.", report.public_url),
        SessionExit::Unknown => println!("ngrok stopped; its exit status is unknown."),
    }
    Ok(())
}

/// Exit code for an error returned by [`execute`].
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<Error>().map_or(1, Error::exit_code)
}
