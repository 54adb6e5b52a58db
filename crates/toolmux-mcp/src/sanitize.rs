//! Flatten tool results into bounded plain text.

use toolmux_core::{TRUNCATION_MARKER, ToolCall, ToolResult};

use crate::client::{CallToolResult, ContentBlock};

/// Render a `tools/call` result as text, capped at `cap` characters.
///
/// Text blocks are joined with newlines; other block kinds become short
/// bracketed placeholders. When no text comes out, the structured content
/// is serialized instead.
pub fn sanitize_tool_result(result: &CallToolResult, cap: usize) -> String {
    let parts: Vec<String> = result.content.iter().filter_map(render_block).collect();
    let mut text = parts.join("\n");

    if text.trim().is_empty() {
        if let Some(structured) = &result.structured_content {
            text = structured.to_string();
        }
    }
    truncate_output(&text, cap)
}

fn render_block(block: &ContentBlock) -> Option<String> {
    match block {
        ContentBlock::Text { text } => Some(text.clone()),
        ContentBlock::Image { mime_type } => Some(format!("[Image content: {mime_type}]")),
        ContentBlock::Audio { mime_type } => Some(format!("[Audio content: {mime_type}]")),
        ContentBlock::ResourceLink { uri } => Some(format!("[Resource link: {uri}]")),
        ContentBlock::Resource { resource } => Some(format!("[Embedded resource: {}]", resource.uri)),
        ContentBlock::Unknown => None,
    }
}

/// Cut `text` to at most `cap` characters (not bytes) and append the
/// truncation marker when anything was dropped.
pub fn truncate_output(text: &str, cap: usize) -> String {
    match text.char_indices().nth(cap) {
        None => text.to_string(),
        Some((byte_index, _)) => {
            let mut out = String::with_capacity(byte_index + TRUNCATION_MARKER.len());
            out.push_str(&text[..byte_index]);
            out.push_str(TRUNCATION_MARKER);
            out
        }
    }
}

/// Build an error result whose whole output stays within `cap` characters
/// plus the truncation marker.
///
/// The message is shortened first so the `{"error": ...}` envelope stays
/// valid JSON. Only when the envelope alone cannot fit is the rendered
/// output cut directly.
pub fn bounded_error(call: &ToolCall, message: &str, cap: usize) -> ToolResult {
    let limit = cap + TRUNCATION_MARKER.chars().count();
    let full = message.chars().count();
    let mut keep = full;
    loop {
        let text = if keep == full {
            message.to_string()
        } else {
            truncate_output(message, keep)
        };
        let mut result = ToolResult::error(call, text);
        let len = result.output.chars().count();
        if len <= limit {
            return result;
        }
        if keep == 0 {
            result.output = truncate_output(&result.output, cap);
            return result;
        }
        keep = keep.saturating_sub(len - limit);
    }
}
