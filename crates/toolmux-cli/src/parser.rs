//! Root CLI structure with global options.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Manage MCP tool servers and call their tools.
#[derive(Parser)]
#[command(name = "toolmux")]
#[command(about = "Connect to MCP tool servers and route tool calls")]
#[command(version)]
pub struct Cli {
    /// Data directory holding servers.json and settings.json
    #[arg(long = "data-dir", env = "TOOLMUX_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}
