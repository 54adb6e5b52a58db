//! `servers` subcommands: edit the stored server list.
//!
//! These only touch the config store; nothing is connected.

use anyhow::Result;
use toolmux_core::{NewServerConfig, ServerConfig};

use crate::bootstrap::CliContext;
use crate::commands::{AddServerArgs, ServersCommand};
use crate::error::CliError;
use crate::presentation::{print_separator, server_target, truncate_string};

pub async fn execute(ctx: &CliContext, command: ServersCommand) -> Result<()> {
    match command {
        ServersCommand::List => list(ctx).await,
        ServersCommand::Add(args) => add(ctx, args).await,
        ServersCommand::Remove { id } => remove(ctx, id).await,
        ServersCommand::Enable { id } => set_enabled(ctx, id, true).await,
        ServersCommand::Disable { id } => set_enabled(ctx, id, false).await,
    }
}

async fn list(ctx: &CliContext) -> Result<()> {
    let servers = ctx.repository.list().await.map_err(CliError::from)?;
    if servers.is_empty() {
        println!("No servers configured. Add one with 'toolmux servers add'.");
        return Ok(());
    }

    println!("{:<4} {:<20} {:<16} {:<8} TARGET", "ID", "NAME", "TRANSPORT", "ENABLED");
    print_separator(80);
    for server in &servers {
        println!(
            "{:<4} {:<20} {:<16} {:<8} {}",
            server.id,
            truncate_string(&server.name, 20),
            server.transport,
            if server.enabled { "yes" } else { "no" },
            truncate_string(&server_target(server), 40),
        );
    }
    Ok(())
}

/// Turn parsed flags into a validated config.
pub fn build_config(args: AddServerArgs) -> Result<NewServerConfig, CliError> {
    let config = NewServerConfig {
        name: args.name.trim().to_string(),
        transport: args.transport,
        url: args.url,
        command: args.command,
        args: args.args,
        working_dir: args.cwd,
        env: args.env.into_iter().collect(),
        headers: args.headers.into_iter().collect(),
        allowed_tools: (!args.allowed_tools.is_empty()).then_some(args.allowed_tools),
        enabled: !args.disabled,
    };
    config.validate()?;
    Ok(config)
}

async fn add(ctx: &CliContext, args: AddServerArgs) -> Result<()> {
    let config = build_config(args)?;
    let stored = ctx.repository.insert(config).await.map_err(CliError::from)?;
    print_stored(&stored);
    Ok(())
}

fn print_stored(server: &ServerConfig) {
    println!(
        "Added server '{}' (ID {}, {}): {}",
        server.name,
        server.id,
        server.transport,
        server_target(server)
    );
    if !server.enabled {
        println!("The server is disabled. Enable it with 'toolmux servers enable {}'.", server.id);
    }
}

async fn remove(ctx: &CliContext, id: i64) -> Result<()> {
    let server = ctx.repository.get_by_id(id).await.map_err(CliError::from)?;
    ctx.repository.delete(id).await.map_err(CliError::from)?;
    println!("Removed server '{}' (ID {id}).", server.name);
    Ok(())
}

async fn set_enabled(ctx: &CliContext, id: i64, enabled: bool) -> Result<()> {
    ctx.repository
        .set_enabled(id, enabled)
        .await
        .map_err(CliError::from)?;
    let verb = if enabled { "Enabled" } else { "Disabled" };
    println!("{verb} server {id}.");
    Ok(())
}
