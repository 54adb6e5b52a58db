//! `tools`: connect every enabled server and print the merged catalog.

use anyhow::Result;

use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::handlers::report_failures;
use crate::presentation::{print_separator, truncate_string};

pub async fn execute(ctx: &CliContext) -> Result<()> {
    let state = ctx
        .manager
        .connect_all(false)
        .await
        .map_err(CliError::from)?;
    report_failures(&state);

    let tools = ctx.manager.tools();
    if tools.is_empty() {
        println!("No tools available ({} server(s) connected).", state.connected_servers);
        ctx.manager.disconnect_all().await;
        return Ok(());
    }

    println!("{:<32} {:<8} DESCRIPTION", "TOOL", "SERVER");
    print_separator(80);
    for tool in &tools {
        let server = ctx
            .manager
            .route_for(&tool.name)
            .await
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        println!(
            "{:<32} {:<8} {}",
            truncate_string(&tool.name, 32),
            server,
            truncate_string(tool.description.lines().next().unwrap_or_default(), 38),
        );
    }
    println!();
    println!(
        "{} tool(s) from {} server(s).",
        tools.len(),
        state.connected_servers
    );

    ctx.manager.disconnect_all().await;
    Ok(())
}
