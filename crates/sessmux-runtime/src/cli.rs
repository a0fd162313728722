//! CLI definition using clap derive.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sessmux", about = "multi-tab admin session coordinator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run an in-process multi-tab simulation of the session protocol
    Simulate(SimulateOpts),
}

#[derive(clap::Args)]
pub struct SimulateOpts {
    /// Number of tabs sharing the origin (the first one is visible)
    #[arg(long, default_value = "3")]
    pub tabs: usize,

    /// Inactivity timeout in milliseconds
    #[arg(long, env = "SESSMUX_INACTIVITY_TIMEOUT_MS", default_value = "15000")]
    pub timeout_ms: u64,

    /// Seconds of simulated user activity before going idle
    #[arg(long, default_value = "5")]
    pub active_secs: u64,
}
