//! Server-sent events: the parser shared by both HTTP transports, and the
//! legacy two-channel SSE transport.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use toolmux_core::TransportKind;
use tracing::{debug, trace, warn};
use url::Url;

use super::framing::{LineBuffer, deliver_payload};
use super::http::apply_headers;
use super::{EventSink, Transport};
use crate::error::{McpError, TransportError};
use crate::jsonrpc::JsonRpcMessage;

const EVENT_STREAM: &str = "text/event-stream";
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(30);

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
///
/// `id` and `retry` fields are accepted and ignored. An event without any
/// `data` line is not dispatched.
#[derive(Debug, Default)]
pub struct SseParser {
    lines: LineBuffer,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and collect every event they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut dispatched = Vec::new();
        for line in self.lines.push(bytes) {
            if let Some(event) = self.feed_line(&line) {
                dispatched.push(event);
            }
        }
        dispatched
    }

    /// Dispatch whatever is pending when the stream ends without a final
    /// blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let tail = String::from_utf8_lossy(self.lines.remainder()).into_owned();
        let mut event = None;
        if !tail.is_empty() {
            event = self.feed_line(&tail);
        }
        event.or_else(|| self.dispatch())
    }

    fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.filter(|e| !e.is_empty()).unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// Read an event stream until it ends or `cancel` fires, handing every
/// event to `on_event`.
pub(super) async fn read_event_stream<F>(
    response: reqwest::Response,
    cancel: &CancellationToken,
    mut on_event: F,
) -> Result<(), TransportError>
where
    F: FnMut(SseEvent) + Send,
{
    let mut stream = response.bytes_stream();
    let mut parser = SseParser::new();
    loop {
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    for event in parser.push(&bytes) {
                        on_event(event);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    if let Some(event) = parser.finish() {
                        on_event(event);
                    }
                    return Ok(());
                }
            }
        }
    }
}

/// Legacy SSE transport: a long-lived GET stream carries server messages,
/// and client messages are POSTed to the endpoint the server announces in
/// its first `endpoint` event.
pub struct SseTransport {
    url: String,
    client: reqwest::Client,
    headers: BTreeMap<String, String>,
    endpoint: Option<Url>,
    events: Option<EventSink>,
    cancel: CancellationToken,
    alive: Arc<AtomicBool>,
}

impl SseTransport {
    pub fn new(url: impl Into<String>, client: reqwest::Client, headers: BTreeMap<String, String>) -> Self {
        Self {
            url: url.into(),
            client,
            headers,
            endpoint: None,
            events: None,
            cancel: CancellationToken::new(),
            alive: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Where client messages are posted, once announced.
    pub const fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn start(&mut self, events: EventSink) -> Result<(), McpError> {
        if self.events.is_some() {
            return Err(TransportError::AlreadyStarted.into());
        }
        let base = Url::parse(&self.url).map_err(|e| TransportError::Protocol(format!("invalid url: {e}")))?;

        let request = apply_headers(self.client.get(base.clone()).header(ACCEPT, EVENT_STREAM), &self.headers);
        let response = request.send().await.map_err(TransportError::from)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http(format!("event stream request failed: HTTP {status}")).into());
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel::<Url>();
        let sink = events.clone();
        let cancel = self.cancel.clone();
        let alive = Arc::clone(&self.alive);
        alive.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let result = read_event_stream(response, &cancel, |event| match event.event.as_str() {
                "endpoint" => match base.join(event.data.trim()) {
                    Ok(url) => {
                        if let Some(tx) = endpoint_tx.take() {
                            let _ = tx.send(url);
                        }
                    }
                    Err(e) => warn!(data = %event.data, error = %e, "Ignoring unparseable endpoint event"),
                },
                "message" => {
                    deliver_payload(&sink, &event.data);
                }
                other => trace!(event = other, "Ignoring event"),
            })
            .await;

            if let Err(e) = result {
                sink.error(e);
            }
            alive.store(false, Ordering::SeqCst);
            debug!("Event stream ended");
            sink.close();
        });

        self.events = Some(events);
        let endpoint = match tokio::time::timeout(ENDPOINT_TIMEOUT, endpoint_rx).await {
            Ok(Ok(url)) => url,
            Ok(Err(_)) => {
                self.close().await;
                return Err(TransportError::Protocol("event stream ended before an endpoint was announced".into()).into());
            }
            Err(_) => {
                self.close().await;
                return Err(McpError::Timeout(ENDPOINT_TIMEOUT));
            }
        };
        debug!(endpoint = %endpoint, "Event stream ready");
        self.endpoint = Some(endpoint);
        Ok(())
    }

    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        let endpoint = self.endpoint.clone().ok_or(TransportError::NotStarted)?;
        if self.cancel.is_cancelled() || !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let request = apply_headers(
            self.client.post(endpoint).header(CONTENT_TYPE, "application/json").json(message),
            &self.headers,
        );
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http(format!("HTTP {status}")));
        }
        Ok(())
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.alive.store(false, Ordering::SeqCst);
        if let Some(events) = &self.events {
            events.close();
        }
    }

    fn is_alive(&self) -> bool {
        self.endpoint.is_some() && self.alive.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportEvent;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn parses_events_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push(b": keep-alive\n\nevent: endpoint\nda").is_empty());
        let events = parser.push(b"ta: /messages?session=1\n\ndata: {\"a\":1}\r\n\r\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "endpoint".into(),
                    data: "/messages?session=1".into()
                },
                SseEvent {
                    event: "message".into(),
                    data: "{\"a\":1}".into()
                },
            ]
        );
    }

    #[test]
    fn joins_multiline_data_and_ignores_ids() {
        let mut parser = SseParser::new();
        let events = parser.push(b"id: 7\nretry: 100\ndata: first\ndata:second\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "first\nsecond");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn event_without_data_is_not_dispatched() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"event: ping\n\n").is_empty());
        // the dropped event name must not leak into the next event
        assert_eq!(parser.push(b"data: x\n\n")[0].event, "message");
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: tail").is_empty());
        assert_eq!(parser.finish().map(|e| e.data), Some("tail".to_string()));
        assert!(parser.finish().is_none());
    }

    /// Answer one GET with an event stream body, then hang up.
    async fn serve_event_stream(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut head = Vec::new();
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n{body}"
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}/sse")
    }

    #[tokio::test]
    async fn resolves_endpoint_and_delivers_messages_until_stream_ends() {
        let url = serve_event_stream(
            "event: endpoint\ndata: /messages?session=abc\n\nevent: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n",
        )
        .await;

        let mut transport = SseTransport::new(url.clone(), reqwest::Client::new(), BTreeMap::new());
        let (sink, mut rx) = EventSink::channel();
        transport.start(sink).await.unwrap();

        let endpoint = transport.endpoint().unwrap().clone();
        assert_eq!(endpoint.path(), "/messages");
        assert_eq!(endpoint.query(), Some("session=abc"));

        let mut messages = 0;
        let mut closes = 0;
        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::Message(_) => messages += 1,
                TransportEvent::Closed => {
                    closes += 1;
                    break;
                }
                TransportEvent::Error(_) => {}
            }
        }
        assert_eq!((messages, closes), (1, 1));
        assert!(!transport.is_alive());
        assert!(matches!(
            transport.send(&JsonRpcMessage::notification("x", None)).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn stream_without_endpoint_fails_start() {
        let url = serve_event_stream("data: {\"jsonrpc\":\"2.0\",\"method\":\"hello\"}\n\n").await;
        let mut transport = SseTransport::new(url, reqwest::Client::new(), BTreeMap::new());
        let (sink, _rx) = EventSink::channel();
        let err = transport.start(sink).await.unwrap_err();
        assert!(matches!(err, McpError::Transport(TransportError::Protocol(_))));
    }

    #[tokio::test]
    async fn send_before_start_is_rejected() {
        let transport = SseTransport::new("http://127.0.0.1:9/sse", reqwest::Client::new(), BTreeMap::new());
        assert!(matches!(
            transport.send(&JsonRpcMessage::notification("x", None)).await,
            Err(TransportError::NotStarted)
        ));
    }
}
