//! `doctor <command>`: explain how a stdio command would be launched.

use anyhow::Result;
use toolmux_mcp::resolver::{EnvironmentResolver, MANAGED_RUNTIME_ALIASES};

use crate::bootstrap::CliContext;

/// Build the report as lines so it can be checked without a terminal.
pub fn report(resolver: &EnvironmentResolver, command: &str) -> Vec<String> {
    let layout = resolver.layout();
    let status = resolver.check_status();
    let mut lines = vec![format!(
        "Sandbox: {} at {} ({})",
        layout.display_name,
        layout.root.display(),
        if status.installed { "installed" } else { "not installed" }
    )];
    if let Some(error) = &status.error {
        lines.push(format!("  problem: {error}"));
    }
    for alias in MANAGED_RUNTIME_ALIASES {
        let found = status
            .runtime_path(alias)
            .map_or_else(|| "missing".to_string(), |p| p.display().to_string());
        lines.push(format!("  {alias:<8} {found}"));
    }

    let executable = command.split_whitespace().next().unwrap_or_default();
    match resolver.resolve_command(executable) {
        None => {
            lines.push(format!("Command '{command}' cannot be resolved."));
            lines.push(resolver.missing_dependency_message(command, &status));
        }
        Some(resolved) => {
            let env = if resolved.use_managed_env { "managed" } else { "host" };
            lines.push(format!(
                "Command '{executable}' -> {} ({env} environment)",
                resolved.executable.display()
            ));
            if resolved.use_managed_env {
                for (key, value) in resolver.managed_environment() {
                    lines.push(format!("  {key}={value}"));
                }
            } else if resolved.executable.is_relative() {
                match resolver.find_on_host_path(executable) {
                    Some(path) => lines.push(format!("  found on PATH: {}", path.display())),
                    None => {
                        lines.push("  not found on PATH".to_string());
                        lines.push(resolver.missing_dependency_message(command, &status));
                    }
                }
            }
        }
    }
    lines
}

pub fn execute(ctx: &CliContext, command: &str) -> Result<()> {
    for line in report(&ctx.resolver, command) {
        println!("{line}");
    }
    Ok(())
}
