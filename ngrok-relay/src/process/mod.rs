//! Tunnel subprocess management.
//!
//! The launcher starts the tunnel binary with piped output; the drain keeps
//! that output flowing for the lifetime of the child and reports a failed
//! exit exactly once.

mod drain;
mod launch;

pub use drain::DrainOutcome;
pub use launch::{launch, tunnel_args, LaunchOptions};
