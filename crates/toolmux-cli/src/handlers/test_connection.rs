//! `test <id>`: probe one stored server without registering it.

use anyhow::Result;

use crate::bootstrap::CliContext;
use crate::error::CliError;

pub async fn execute(ctx: &CliContext, id: i64) -> Result<()> {
    let config = ctx.repository.get_by_id(id).await.map_err(CliError::from)?;
    let timeout = ctx.settings.effective_test_connection_timeout();
    println!(
        "Testing '{}' ({}), timeout {}s...",
        config.name,
        config.transport,
        timeout.as_secs()
    );

    let tool_count = ctx
        .manager
        .test_connection(&config)
        .await
        .map_err(CliError::from)?;
    println!("OK: {tool_count} tool(s) available.");
    Ok(())
}
