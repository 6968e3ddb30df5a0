//! On-disk secrets: the webhook URL file and the generated ngrok config.
//!
//! Secrets are configured once and read on every later run. When a secret is
//! missing or invalid the operator is prompted, the answer is persisted, and
//! the run stops with [`Error::MissingCredentials`] so the tunnel is only
//! started by a fresh invocation.

use std::path::Path;

use dialoguer::{Confirm, Input};

use crate::config::Config;
use crate::error::{Error, Result};

/// ngrok config schema version written into the service config.
pub const SERVICE_CONFIG_VERSION: &str = "\"2\"";

const WEBHOOK_PREFIXES: &[&str] = &[
    "https://discordapp.com/api/webhooks",
    "https://discord.com/api/webhooks",
];

/// Source of interactive answers.
pub trait Prompter {
    /// Ask for a line of text.
    fn input(&mut self, prompt: &str) -> Result<String>;

    /// Ask a yes/no question; anything but an explicit yes is no.
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// Prompter backed by the terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn input(&mut self, prompt: &str) -> Result<String> {
        Input::<String>::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .map_err(|e| Error::Prompt(e.to_string()))
    }

    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(|e| Error::Prompt(e.to_string()))
    }
}

/// Whether `content` looks like a Discord webhook URL.
pub fn is_webhook_url(content: &str) -> bool {
    WEBHOOK_PREFIXES.iter().any(|prefix| content.contains(prefix))
}

/// Read a secret, dropping newlines. `None` if the file cannot be read.
pub fn read_secret(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let cleaned = content.replace('\n', "");
    Some(cleaned.strip_suffix('\r').unwrap_or(&cleaned).to_string())
}

/// Persist a secret verbatim.
pub fn write_secret(path: &Path, value: &str) -> Result<()> {
    std::fs::write(path, value).map_err(|e| Error::io(path, e))
}

/// Load a secret, or prompt for it, save it and stop the run.
///
/// Returns the stored value when it passes `validator`. Otherwise the answer
/// to the prompt is written to `path` and [`Error::MissingCredentials`] is
/// returned.
pub fn load_or_prompt<F>(
    path: &Path,
    label: &'static str,
    validator: F,
    prompter: &mut dyn Prompter,
) -> Result<String>
where
    F: Fn(&str) -> bool,
{
    if let Some(secret) = read_secret(path).filter(|s| validator(s)) {
        return Ok(secret);
    }

    tracing::info!(path = %path.display(), "{label} missing or invalid, prompting");
    let answer = prompter.input(&format!("Please input {label}"))?;
    write_secret(path, &answer)?;

    Err(Error::MissingCredentials {
        label,
        path: path.to_path_buf(),
    })
}

/// Load the webhook URL, prompting for it on first use.
pub fn load_webhook_url(config: &Config, prompter: &mut dyn Prompter) -> Result<String> {
    load_or_prompt(
        &config.webhook_path,
        "discord webhook url",
        is_webhook_url,
        prompter,
    )
}

/// Render the three-line ngrok config.
pub fn render_service_config(authtoken: &str, web_addr: u16) -> String {
    format!("version: {SERVICE_CONFIG_VERSION}\nauthtoken: {authtoken}\nweb_addr: {web_addr}")
}

pub fn write_service_config(path: &Path, authtoken: &str, web_addr: u16) -> Result<()> {
    std::fs::write(path, render_service_config(authtoken, web_addr)).map_err(|e| Error::io(path, e))
}

pub fn service_config_exists(path: &Path) -> bool {
    path.exists()
}

/// Interactive `--configure` flow.
///
/// Writes the service config from a prompted authtoken, then asks for the
/// webhook URL too if none is stored yet.
pub fn configure(config: &Config, prompter: &mut dyn Prompter) -> Result<()> {
    let path = &config.service_config_path;
    if service_config_exists(path) {
        println!("There already is a config file at {}", path.display());
        println!("If you continue, you will overwrite the existing config.\n");
    }

    let authtoken = prompter.input("Please input authtoken")?;

    println!("Saving to file...");
    write_service_config(path, &authtoken, config.web_addr)?;
    tracing::info!(path = %path.display(), "wrote service config");

    println!(
        "Saved config to {} using authtoken {authtoken}, version {SERVICE_CONFIG_VERSION} and web interface port {}",
        path.display(),
        config.web_addr
    );

    if read_secret(&config.webhook_path).filter(|s| is_webhook_url(s)).is_none() {
        let url = prompter.input("Please input discord webhook url")?;
        write_secret(&config.webhook_path, &url)?;
        println!("Saved webhook url to {}", config.webhook_path.display());
    }
    Ok(())
}
