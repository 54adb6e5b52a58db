//! Streamable HTTP transport.
//!
//! Every client message is its own POST. The server answers with a JSON
//! body (one message or a batch), with an event stream carrying the
//! replies, or with `202 Accepted` and no body. The session id the server
//! assigns on the first response is echoed on every later request.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use toolmux_core::TransportKind;
use tracing::{debug, warn};

use super::framing::deliver_payload;
use super::sse::read_event_stream;
use super::{EventSink, Transport};
use crate::error::{McpError, TransportError};
use crate::jsonrpc::{JsonRpcMessage, PROTOCOL_VERSION};

pub const SESSION_HEADER: &str = "Mcp-Session-Id";
pub const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";

/// Attach configured static headers to a request.
pub(super) fn apply_headers(
    mut request: reqwest::RequestBuilder,
    headers: &BTreeMap<String, String>,
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    request
}

pub struct StreamableHttpTransport {
    url: String,
    client: reqwest::Client,
    headers: BTreeMap<String, String>,
    session_id: Mutex<Option<String>>,
    events: Option<EventSink>,
    cancel: CancellationToken,
    close_started: AtomicBool,
}

impl StreamableHttpTransport {
    pub fn new(url: impl Into<String>, client: reqwest::Client, headers: BTreeMap<String, String>) -> Self {
        Self {
            url: url.into(),
            client,
            headers,
            session_id: Mutex::new(None),
            events: None,
            cancel: CancellationToken::new(),
            close_started: AtomicBool::new(false),
        }
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.lock().await.clone()
    }

    async fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = apply_headers(builder, &self.headers);
        if let Some(session) = self.session_id.lock().await.as_deref() {
            builder = builder
                .header(SESSION_HEADER, session)
                .header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);
        }
        builder
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn start(&mut self, events: EventSink) -> Result<(), McpError> {
        if self.events.is_some() {
            return Err(TransportError::AlreadyStarted.into());
        }
        url::Url::parse(&self.url).map_err(|e| TransportError::Protocol(format!("invalid url: {e}")))?;
        self.events = Some(events);
        Ok(())
    }

    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        let events = self.events.as_ref().ok_or(TransportError::NotStarted)?;
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let builder = self
            .client
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .json(message);
        let response = self.request(builder).await.send().await?;

        if let Some(session) = response.headers().get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
            let mut current = self.session_id.lock().await;
            if current.as_deref() != Some(session) {
                debug!(session, "Session assigned");
                *current = Some(session.to_string());
            }
        }

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND && self.session_id.lock().await.take().is_some() {
            return Err(TransportError::Http("session expired (HTTP 404)".into()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {status}: {}", body.trim())));
        }

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));

        if is_stream {
            let sink = events.clone();
            let cancel = self.cancel.child_token();
            tokio::spawn(async move {
                let result = read_event_stream(response, &cancel, |event| {
                    if event.event == "message" {
                        deliver_payload(&sink, &event.data);
                    }
                })
                .await;
                if let Err(e) = result {
                    sink.error(e);
                }
            });
        } else {
            let body = response.text().await?;
            deliver_payload(events, &body);
        }
        Ok(())
    }

    async fn close(&self) {
        if self.close_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        if let Some(session) = self.session_id.lock().await.take() {
            let request = apply_headers(self.client.delete(&self.url), &self.headers).header(SESSION_HEADER, session);
            if let Err(e) = request.send().await {
                warn!(error = %e, "Failed to end HTTP session");
            }
        }
        if let Some(events) = &self.events {
            events.close();
        }
    }

    fn is_alive(&self) -> bool {
        self.events.is_some() && !self.cancel.is_cancelled()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }
}

impl Drop for StreamableHttpTransport {
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

    /// Serve canned responses, one per connection, returning the request
    /// heads received.
    async fn serve(responses: Vec<String>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut heads = Vec::new();
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 8192];
                let mut raw = Vec::new();
                loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    raw.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&raw).to_string();
                    if let Some(end) = text.find("\r\n\r\n") {
                        let length = text[..end]
                            .lines()
                            .find_map(|l| {
                                let lower = l.to_ascii_lowercase();
                                lower.strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap())
                            })
                            .unwrap_or(0);
                        if raw.len() >= end + 4 + length || n == 0 {
                            heads.push(text[..end].to_string());
                            break;
                        }
                    }
                    if n == 0 {
                        break;
                    }
                }
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            heads
        });
        (format!("http://{addr}/mcp"), handle)
    }

    fn json_response(body: &str, extra: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n{extra}Connection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[tokio::test]
    async fn json_reply_and_session_header_round_trip() {
        let (url, server) = serve(vec![
            json_response(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#, "Mcp-Session-Id: s-42\r\n"),
            "HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
        ])
        .await;

        let mut transport = StreamableHttpTransport::new(url, reqwest::Client::new(), BTreeMap::new());
        let (sink, mut rx) = EventSink::channel();
        transport.start(sink).await.unwrap();

        transport
            .send(&JsonRpcMessage::request(1_i64, "initialize", None))
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(TransportEvent::Message(_))));
        assert_eq!(transport.session_id().await.as_deref(), Some("s-42"));

        transport
            .send(&JsonRpcMessage::notification("notifications/initialized", None))
            .await
            .unwrap();

        transport.close().await;
        assert!(matches!(rx.recv().await, Some(TransportEvent::Closed)));
        assert!(!transport.is_alive());

        let heads = server.await.unwrap();
        assert_eq!(heads.len(), 3);
        assert!(!heads[0].to_ascii_lowercase().contains("mcp-session-id"));
        assert!(heads[1].to_ascii_lowercase().contains("mcp-session-id: s-42"));
        assert!(heads[2].starts_with("DELETE"));
    }

    #[tokio::test]
    async fn event_stream_reply_is_forwarded() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":5,\"result\":{\"ok\":true}}\n\n";
        let (url, _server) = serve(vec![format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n{body}"
        )])
        .await;

        let mut transport = StreamableHttpTransport::new(url, reqwest::Client::new(), BTreeMap::new());
        let (sink, mut rx) = EventSink::channel();
        transport.start(sink).await.unwrap();
        transport.send(&JsonRpcMessage::request(5_i64, "tools/list", None)).await.unwrap();

        match rx.recv().await {
            Some(TransportEvent::Message(message)) => {
                assert_eq!(message.id(), Some(&crate::jsonrpc::RequestId::Number(5)));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let (url, _server) = serve(vec![
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\nConnection: close\r\n\r\nboom".to_string(),
        ])
        .await;
        let mut transport = StreamableHttpTransport::new(url, reqwest::Client::new(), BTreeMap::new());
        let (sink, _rx) = EventSink::channel();
        transport.start(sink).await.unwrap();
        let err = transport.send(&JsonRpcMessage::request(1_i64, "ping", None)).await.unwrap_err();
        assert!(matches!(err, TransportError::Http(ref msg) if msg.contains("500") && msg.contains("boom")));
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let mut transport = StreamableHttpTransport::new("http://127.0.0.1:9/mcp", reqwest::Client::new(), BTreeMap::new());
        let (sink, _rx) = EventSink::channel();
        transport.start(sink).await.unwrap();
        transport.close().await;
        transport.close().await;
        assert!(matches!(
            transport.send(&JsonRpcMessage::request(1_i64, "ping", None)).await,
            Err(TransportError::Closed)
        ));
    }
}
