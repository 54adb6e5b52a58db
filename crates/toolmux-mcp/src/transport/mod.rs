//! Transport abstraction.
//!
//! A transport moves framed JSON-RPC messages between toolmux and one
//! server. Inbound traffic is delivered through an [`EventSink`] handed to
//! [`Transport::start`]; the sink guarantees the close notification fires
//! exactly once no matter how many paths (EOF, error, explicit close) race
//! to report it.
//!
//! Variants:
//! - [`StdioTransport`]: child process, newline-delimited JSON on stdio
//! - [`StreamableHttpTransport`]: POST per message, JSON or SSE replies
//! - [`SseTransport`]: long-lived GET event stream plus POST endpoint
//! - [`WebSocketTransport`]: one message per text frame

mod framing;
mod http;
mod sse;
mod stdio;
mod websocket;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use toolmux_core::TransportKind;

use crate::error::{McpError, TransportError};
use crate::jsonrpc::JsonRpcMessage;

pub use framing::{LineBuffer, LineOutcome, deliver_payload, parse_line};
pub use http::StreamableHttpTransport;
pub use sse::{SseEvent, SseParser, SseTransport};
pub use stdio::{LaunchPlan, StdioCommand, StdioLauncher, StdioTransport, TransportState, split_command};
pub use websocket::WebSocketTransport;

/// Something a transport observed.
#[derive(Debug)]
pub enum TransportEvent {
    Message(JsonRpcMessage),
    Error(TransportError),
    Closed,
}

/// Delivery side of a transport's event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Deliver an inbound message. Returns `false` once nobody listens or
    /// the sink has closed.
    pub fn message(&self, message: JsonRpcMessage) -> bool {
        !self.is_closed() && self.tx.send(TransportEvent::Message(message)).is_ok()
    }

    pub fn error(&self, error: TransportError) {
        if !self.is_closed() {
            let _ = self.tx.send(TransportEvent::Error(error));
        }
    }

    /// Fire the close notification. Only the first call has any effect;
    /// it returns `true`.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.tx.send(TransportEvent::Closed);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A bidirectional JSON-RPC message channel to one server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the channel. Inbound traffic goes to `events` from here on.
    async fn start(&mut self, events: EventSink) -> Result<(), McpError>;

    /// Send one message. Concurrent calls must be serialized by the caller.
    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError>;

    /// Tear down and fire the close notification if it has not fired.
    /// Safe to call more than once and from any task.
    async fn close(&self);

    /// Point-in-time liveness.
    fn is_alive(&self) -> bool;

    fn kind(&self) -> TransportKind;
}
