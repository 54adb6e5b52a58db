//! `call`: route one tool call through the connection manager.

use anyhow::Result;
use serde_json::{Map, Value};
use toolmux_core::ToolCall;

use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::handlers::report_failures;

/// Parse `--args` into a JSON object. Absent means no arguments.
pub fn parse_arguments(raw: Option<&str>) -> Result<Map<String, Value>, CliError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(CliError::Arguments(format!(
            "--args must be a JSON object, got {other}"
        ))),
        Err(e) => Err(CliError::Arguments(format!("--args is not valid JSON: {e}"))),
    }
}

pub async fn execute(ctx: &CliContext, name: &str, raw_args: Option<&str>) -> Result<()> {
    let arguments = parse_arguments(raw_args)?;

    let state = ctx
        .manager
        .connect_all(false)
        .await
        .map_err(CliError::from)?;
    report_failures(&state);

    let call = ToolCall::new("cli-1", name, arguments);
    let result = ctx.manager.call_tool(&call).await;
    ctx.manager.disconnect_all().await;

    if result.is_error {
        return Err(CliError::ToolFailed(result.output).into());
    }
    println!("{}", result.output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_blank_args_are_empty() {
        assert!(parse_arguments(None).unwrap().is_empty());
        assert!(parse_arguments(Some("  ")).unwrap().is_empty());
    }

    #[test]
    fn object_args_are_kept() {
        let args = parse_arguments(Some(r#"{"path": "/tmp", "depth": 2}"#)).unwrap();
        assert_eq!(args.get("depth"), Some(&Value::from(2)));
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(matches!(parse_arguments(Some("[1,2]")), Err(CliError::Arguments(_))));
        assert!(matches!(parse_arguments(Some("{oops")), Err(CliError::Arguments(_))));
    }
}
