//! Server-agnostic tool catalog and invocation types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Default cap on a flattened tool output, in characters.
pub const MAX_TOOL_OUTPUT_CHARS: usize = 12_000;

/// Appended to outputs cut at the cap.
pub const TRUNCATION_MARKER: &str = "\n[truncated]";

/// A tool in the merged catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Unique within the catalog at a point in time.
    pub name: String,
    pub description: String,
    /// JSON-schema object: `{"type":"object","properties"?,"required"?}`.
    pub parameters: Value,
}

impl Tool {
    /// Build a catalog entry from a server-reported definition.
    ///
    /// A missing description falls back to the tool name. Only `properties`
    /// and `required` are carried over from the input schema.
    pub fn from_definition(name: String, description: Option<String>, input_schema: Option<&Value>) -> Self {
        let mut parameters = Map::new();
        parameters.insert("type".to_string(), Value::String("object".to_string()));
        if let Some(schema) = input_schema {
            for key in ["properties", "required"] {
                if let Some(value) = schema.get(key) {
                    parameters.insert(key.to_string(), value.clone());
                }
            }
        }

        Self {
            description: description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| name.clone()),
            name,
            parameters: Value::Object(parameters),
        }
    }
}

/// A caller-issued tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque id echoed back on the result.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The uniform answer to a [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call: &ToolCall, output: String) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output,
            is_error: false,
        }
    }

    /// Error result whose output is `{"error": message}`.
    pub fn error(call: &ToolCall, message: impl AsRef<str>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output: json!({ "error": message.as_ref() }).to_string(),
            is_error: true,
        }
    }

    /// Error result carrying a server-produced output as-is.
    pub fn failed_with_output(call: &ToolCall, output: String) -> Self {
        Self {
            is_error: true,
            ..Self::success(call, output)
        }
    }
}
