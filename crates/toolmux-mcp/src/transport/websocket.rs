//! WebSocket transport: one JSON-RPC message per text frame.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use toolmux_core::TransportKind;
use tracing::{debug, trace};

use super::framing::deliver_payload;
use super::{EventSink, Transport};
use crate::error::{McpError, TransportError};
use crate::jsonrpc::JsonRpcMessage;

const SUBPROTOCOL: &str = "mcp";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub struct WebSocketTransport {
    url: String,
    headers: BTreeMap<String, String>,
    writer: Arc<Mutex<Option<WsSink>>>,
    events: Option<EventSink>,
    cancel: CancellationToken,
    alive: Arc<AtomicBool>,
    close_started: AtomicBool,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, headers: BTreeMap<String, String>) -> Self {
        Self {
            url: url.into(),
            headers,
            writer: Arc::new(Mutex::new(None)),
            events: None,
            cancel: CancellationToken::new(),
            alive: Arc::new(AtomicBool::new(false)),
            close_started: AtomicBool::new(false),
        }
    }

    fn build_request(
        &self,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, TransportError> {
        let mut request = self.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::WebSocket(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::WebSocket(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }
        Ok(request)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn start(&mut self, events: EventSink) -> Result<(), McpError> {
        if self.events.is_some() {
            return Err(TransportError::AlreadyStarted.into());
        }
        let request = self.build_request()?;
        let (stream, _response) = connect_async(request).await.map_err(TransportError::from)?;
        let (writer, mut reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        self.alive.store(true, Ordering::SeqCst);

        let sink = events.clone();
        let cancel = self.cancel.clone();
        let alive = Arc::clone(&self.alive);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    frame = reader.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            deliver_payload(&sink, &text);
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            deliver_payload(&sink, &String::from_utf8_lossy(&bytes));
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "Server closed websocket");
                            break;
                        }
                        Some(Ok(other)) => trace!(?other, "Ignoring control frame"),
                        Some(Err(e)) => {
                            sink.error(e.into());
                            break;
                        }
                        None => break,
                    }
                }
            }
            alive.store(false, Ordering::SeqCst);
            sink.close();
        });

        self.events = Some(events);
        Ok(())
    }

    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        if self.events.is_none() {
            return Err(TransportError::NotStarted);
        }
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let text = serde_json::to_string(message)?;
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(TransportError::Closed)?;
        writer.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&self) {
        if self.close_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.alive.store(false, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.send(Message::Close(None)).await;
            let _ = writer.close().await;
        }
        self.cancel.cancel();
        if let Some(events) = &self.events {
            events.close();
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportEvent;
    use tokio::net::TcpListener;

    /// Echo every text frame back, recording the requested subprotocol.
    async fn echo_server() -> (String, tokio::sync::oneshot::Receiver<Option<String>>) {
        use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (proto_tx, proto_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut proto_tx = Some(proto_tx);
            let callback = |request: &Request, mut response: Response| {
                let proto = request
                    .headers()
                    .get("Sec-WebSocket-Protocol")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                if proto.is_some() {
                    response
                        .headers_mut()
                        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));
                }
                if let Some(tx) = proto_tx.take() {
                    let _ = tx.send(proto);
                }
                Ok::<_, ErrorResponse>(response)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(socket, callback).await.unwrap();
            while let Some(Ok(frame)) = ws.next().await {
                match frame {
                    Message::Text(_) => ws.send(frame).await.unwrap(),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });
        (format!("ws://{addr}/mcp"), proto_rx)
    }

    #[tokio::test]
    async fn exchanges_text_frames() {
        let (url, proto) = echo_server().await;
        let mut transport = WebSocketTransport::new(url, BTreeMap::new());
        let (sink, mut rx) = EventSink::channel();
        transport.start(sink).await.unwrap();
        assert_eq!(proto.await.unwrap().as_deref(), Some("mcp"));
        assert!(transport.is_alive());

        transport
            .send(&JsonRpcMessage::notification("notifications/ping", None))
            .await
            .unwrap();
        match rx.recv().await {
            Some(TransportEvent::Message(message)) => assert_eq!(message.method(), Some("notifications/ping")),
            other => panic!("unexpected event: {other:?}"),
        }

        transport.close().await;
        transport.close().await;
        assert!(!transport.is_alive());

        let mut closes = 0;
        while let Ok(Some(event)) = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await {
            if matches!(event, TransportEvent::Closed) {
                closes += 1;
            }
        }
        assert_eq!(closes, 1);
    }

    #[tokio::test]
    async fn rejects_invalid_header_names() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let transport = WebSocketTransport::new("ws://127.0.0.1:9/", headers);
        assert!(matches!(transport.build_request(), Err(TransportError::WebSocket(_))));
    }

    #[tokio::test]
    async fn send_before_start_is_rejected() {
        let transport = WebSocketTransport::new("ws://127.0.0.1:9/", BTreeMap::new());
        assert!(matches!(
            transport.send(&JsonRpcMessage::notification("x", None)).await,
            Err(TransportError::NotStarted)
        ));
    }
}
