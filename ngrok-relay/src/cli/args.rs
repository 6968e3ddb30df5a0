//! CLI argument definitions.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::config::{TunnelSelector, DEFAULT_WEB_ADDR};

pub const EXAMPLES: &str = "\
EXAMPLES:
   ngrok-relay --configure        # Add authtoken to use with ngrok
   ngrok-relay http 80            # Secure public URL for port 80
   ngrok-relay tcp 22             # Tunnel arbitrary TCP traffic to port 22";

/// ngrok-relay - Start an ngrok tunnel and post its public URL to a Discord webhook
#[derive(Parser, Debug)]
#[command(name = "ngrok-relay")]
#[command(author, version, about, long_about = None)]
#[command(after_help = EXAMPLES)]
pub struct Cli {
    /// Add authtoken (and webhook url) to use with ngrok, then exit
    #[arg(long)]
    pub configure: bool,

    // === Files ===
    /// Directory holding the ngrok binary and config files
    #[arg(long, global = true, default_value = ".")]
    pub dir: PathBuf,

    /// Path to the ngrok binary (defaults to <dir>/ngrok)
    #[arg(long, global = true)]
    pub ngrok: Option<PathBuf>,

    /// Port of the ngrok web interface / status API
    #[arg(long, global = true, default_value_t = DEFAULT_WEB_ADDR)]
    pub web_addr: u16,

    // === Tunnel Selection ===
    /// Only report the tunnel with this name
    #[arg(long, global = true)]
    pub tunnel_name: Option<String>,

    /// Only report a tunnel with this protocol (e.g. https, http, tcp)
    #[arg(long, global = true)]
    pub tunnel_proto: Option<String>,

    // === Logging ===
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    pub fn selector(&self) -> TunnelSelector {
        TunnelSelector {
            name: self.tunnel_name.clone(),
            proto: self.tunnel_proto.clone(),
        }
    }
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Secure public URL for a local HTTP port
    Http {
        /// Local port (or address) to forward to
        port: String,

        /// Extra arguments passed through to ngrok
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        extra: Vec<String>,
    },

    /// Tunnel arbitrary TCP traffic to a local port
    Tcp {
        /// Local port (or address) to forward to
        port: String,

        /// Extra arguments passed through to ngrok
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        extra: Vec<String>,
    },

    #[command(external_subcommand)]
    External(Vec<String>),
}
