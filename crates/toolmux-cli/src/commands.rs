//! Subcommands.

use clap::{Args, Subcommand};
use toolmux_core::TransportKind;

#[derive(Subcommand)]
pub enum Commands {
    /// Manage stored server configurations
    Servers {
        #[command(subcommand)]
        command: ServersCommand,
    },

    /// Connect to every enabled server and list the merged tool catalog
    Tools,

    /// Call a tool on whichever server provides it
    Call {
        /// Tool name
        name: String,
        /// Arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },

    /// Connect to one stored server, count its tools, disconnect
    Test {
        /// Server id
        id: i64,
    },

    /// Show how a command would be resolved and launched
    Doctor {
        /// Command name or path (e.g. "npx", "/usr/bin/python3")
        command: String,
    },
}

#[derive(Subcommand)]
pub enum ServersCommand {
    /// List stored servers
    List,

    /// Store a new server
    Add(AddServerArgs),

    /// Delete a stored server
    Remove {
        /// Server id
        id: i64,
    },

    /// Include a server in future connect passes
    Enable {
        /// Server id
        id: i64,
    },

    /// Skip a server in future connect passes
    Disable {
        /// Server id
        id: i64,
    },
}

#[derive(Args, Debug)]
pub struct AddServerArgs {
    /// Unique server name
    pub name: String,

    /// stdio, sse, streamable_http or websocket
    #[arg(short, long, default_value = "stdio", value_parser = parse_transport)]
    pub transport: TransportKind,

    /// Endpoint for remote transports
    #[arg(long)]
    pub url: Option<String>,

    /// Command for stdio servers; may carry inline arguments
    #[arg(short, long)]
    pub command: Option<String>,

    /// Working directory for stdio servers (absolute)
    #[arg(long)]
    pub cwd: Option<String>,

    /// Environment variable for the child process (KEY=VALUE, repeatable)
    #[arg(long = "env", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Request header for remote transports (NAME=VALUE, repeatable)
    #[arg(long = "header", value_parser = parse_key_val)]
    pub headers: Vec<(String, String)>,

    /// Only expose these tools (repeatable)
    #[arg(long = "allow")]
    pub allowed_tools: Vec<String>,

    /// Store the server disabled
    #[arg(long)]
    pub disabled: bool,

    /// Arguments appended after the command
    #[arg(last = true)]
    pub args: Vec<String>,
}

fn parse_transport(raw: &str) -> Result<TransportKind, String> {
    raw.parse().map_err(|e: toolmux_core::ConfigError| e.to_string())
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_val_splits_on_first_equals() {
        assert_eq!(parse_key_val("A=b=c"), Ok(("A".into(), "b=c".into())));
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn transport_aliases() {
        assert_eq!(parse_transport("ws"), Ok(TransportKind::WebSocket));
        assert!(parse_transport("carrier-pigeon").is_err());
    }
}
