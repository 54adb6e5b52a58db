//! Newline framing shared by the stdio and event-stream transports.

use serde_json::Value;

use super::EventSink;
use crate::error::TransportError;
use crate::jsonrpc::JsonRpcMessage;

/// Longest line kept, in bytes. Longer lines are dropped whole.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Accumulates raw bytes and yields complete lines.
///
/// Bytes are buffered (not decoded) until a newline arrives, so multi-byte
/// characters split across reads decode correctly.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    max_line: usize,
    /// Inside an oversized line; skip until its newline.
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    /// Append `bytes` and drain every complete line, without the newline
    /// (a trailing `\r` is also dropped).
    ///
    /// A line longer than the limit is dropped with a warning, and so is
    /// the rest of it as it keeps arriving.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut bytes = bytes;
        if self.discarding {
            let Some(pos) = bytes.iter().position(|b| *b == b'\n') else {
                return lines;
            };
            self.discarding = false;
            bytes = &bytes[pos + 1..];
        }

        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.len() > self.max_line {
                tracing::warn!(bytes = line.len(), limit = self.max_line, "Dropping oversized line");
                continue;
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }

        if self.pending.len() > self.max_line {
            tracing::warn!(
                bytes = self.pending.len(),
                limit = self.max_line,
                "Dropping oversized line before its end arrives"
            );
            self.pending = Vec::new();
            self.discarding = true;
        }
        lines
    }

    /// Bytes received after the last newline.
    pub fn remainder(&self) -> &[u8] {
        &self.pending
    }
}

/// What one inbound stdio line turned out to be.
#[derive(Debug)]
pub enum LineOutcome {
    Blank,
    /// Not protocol output (startup banners and the like).
    Noise,
    Message(JsonRpcMessage),
    Invalid(serde_json::Error),
}

/// Classify one line of child stdout.
pub fn parse_line(line: &str) -> LineOutcome {
    let line = line.trim();
    if line.is_empty() {
        return LineOutcome::Blank;
    }
    if !line.starts_with('{') {
        return LineOutcome::Noise;
    }
    match serde_json::from_str(line) {
        Ok(message) => LineOutcome::Message(message),
        Err(e) => LineOutcome::Invalid(e),
    }
}

/// Deliver a JSON body received from a remote server. Batches arrive as
/// arrays; each element is delivered on its own. Returns how many messages
/// were delivered.
pub fn deliver_payload(events: &EventSink, payload: &str) -> usize {
    let payload = payload.trim();
    if payload.is_empty() {
        return 0;
    }
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            events.error(TransportError::Json(e));
            return 0;
        }
    };
    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    let mut delivered = 0;
    for item in items {
        match serde_json::from_value::<JsonRpcMessage>(item) {
            Ok(message) => {
                if events.message(message) {
                    delivered += 1;
                }
            }
            Err(e) => events.error(TransportError::Json(e)),
        }
    }
    delivered
}
