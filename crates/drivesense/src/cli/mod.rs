//! Command-line interface for the `drivesense` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, SendCommand, ServeCommand, StatusCommand};

use crate::logging::Verbosity;

/// drivesense - Vehicle motion telemetry ingest
///
/// Receives accelerometer and gyroscope datagrams, keeps one merged snapshot
/// with derived driving metrics, and serves it over HTTP.
#[derive(Debug, Parser)]
#[command(name = "drivesense")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the datagram listener and query endpoint
    Serve(ServeCommand),

    /// Show the persisted snapshot
    Status(StatusCommand),

    /// Send one datagram to a listener
    Send(SendCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}
