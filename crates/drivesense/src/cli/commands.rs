//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Serve command arguments.
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Run only the datagram listener, without the HTTP endpoint
    #[arg(long)]
    pub no_http: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Send command arguments.
#[derive(Debug, Args)]
pub struct SendCommand {
    /// Datagram payload, e.g. "rotation,0.1,0.2,0.3" or a JSON object
    pub payload: String,

    /// Where to send it (defaults to the configured listener on this host)
    #[arg(short, long, value_name = "HOST:PORT")]
    pub target: Option<String>,
}

impl SendCommand {
    /// Resolve the destination, falling back to loopback on `port`.
    #[must_use]
    pub fn target_or(&self, port: u16) -> String {
        self.target
            .clone()
            .unwrap_or_else(|| format!("127.0.0.1:{port}"))
    }
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
