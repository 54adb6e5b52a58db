//! MCP JSON-RPC client.
//!
//! Runs the MCP handshake and the `tools/*` requests over any [`Transport`].
//! Responses are matched to requests by id, so several requests may be in
//! flight on one connection.
//! Reference: <https://modelcontextprotocol.io/specification/2025-06-18>

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{McpError, TransportError};
use crate::jsonrpc::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, RequestId, error_codes};
use crate::transport::{EventSink, Transport, TransportEvent};

/// Upper bound on `tools/list` pages, in case a server keeps handing out
/// cursors.
const MAX_TOOL_PAGES: usize = 100;

type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Value, McpError>>>>>;

/// MCP initialize result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub server_info: ServerInfo,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub resources: Option<Value>,
    #[serde(default)]
    pub prompts: Option<Value>,
}

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

/// One page of `tools/list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsPage {
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Resource body embedded in a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedResource {
    pub uri: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// One item of a `tools/call` result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "mimeType", default)]
        mime_type: String,
    },
    Audio {
        #[serde(rename = "mimeType", default)]
        mime_type: String,
    },
    ResourceLink {
        uri: String,
    },
    Resource {
        resource: EmbeddedResource,
    },
    #[serde(other)]
    Unknown,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub structured_content: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

/// Client side of one MCP connection.
pub struct McpClient {
    server_name: String,
    transport: Arc<dyn Transport>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_id: AtomicI64,
    send_lock: Mutex<()>,
    request_timeout: Option<Duration>,
    server_info: Option<ServerInfo>,
    capabilities: Option<ServerCapabilities>,
    dispatcher: JoinHandle<()>,
}

impl McpClient {
    /// Start `transport` and begin dispatching its inbound traffic. The
    /// handshake is a separate step, see [`McpClient::initialize`].
    pub async fn connect(server_name: impl Into<String>, mut transport: Box<dyn Transport>) -> Result<Self, McpError> {
        let server_name = server_name.into();
        let (sink, rx) = EventSink::channel();
        transport.start(sink).await?;

        let transport: Arc<dyn Transport> = Arc::from(transport);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let dispatcher = tokio::spawn(dispatch(
            server_name.clone(),
            rx,
            Arc::downgrade(&transport),
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        Ok(Self {
            server_name,
            transport,
            pending,
            closed,
            next_id: AtomicI64::new(1),
            send_lock: Mutex::new(()),
            request_timeout: None,
            server_info: None,
            capabilities: None,
            dispatcher,
        })
    }

    /// Bound every request. Without one a request waits until it is
    /// answered or the transport closes.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Server info (available after initialize).
    pub const fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Run the `initialize` handshake and send `notifications/initialized`.
    pub async fn initialize(&mut self, client_name: &str) -> Result<InitializeResult, McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": client_name,
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {}
        });
        let result: InitializeResult = self.request("initialize", Some(params)).await?;
        debug!(
            server = %self.server_name,
            protocol = %result.protocol_version,
            remote = %result.server_info.name,
            "MCP session initialized"
        );

        self.server_info = Some(result.server_info.clone());
        self.capabilities = Some(result.capabilities.clone());
        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    /// Fetch one page of tools.
    pub async fn list_tools(&self, cursor: Option<&str>) -> Result<ToolsPage, McpError> {
        let params = cursor.map(|c| json!({ "cursor": c }));
        self.request("tools/list", params).await
    }

    /// Fetch every page of tools. Returns nothing when the server did not
    /// advertise the tools capability.
    pub async fn list_all_tools(&self) -> Result<Vec<ToolDefinition>, McpError> {
        if self.capabilities.as_ref().is_some_and(|c| c.tools.is_none()) {
            return Ok(Vec::new());
        }

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_TOOL_PAGES {
            let page = self.list_tools(cursor.as_deref()).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => return Ok(tools),
            }
        }
        warn!(server = %self.server_name, "Stopped paging tools/list after {MAX_TOOL_PAGES} pages");
        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<CallToolResult, McpError> {
        let params = json!({
            "name": name,
            "arguments": arguments
        });
        self.request("tools/call", Some(params)).await
    }

    /// Send a request and wait for its response.
    async fn request<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T, McpError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed.into());
            }
            pending.insert(id.clone(), tx);
        }

        let message = JsonRpcMessage::request(id.clone(), method, params);
        trace!(server = %self.server_name, %id, method, "Sending request");
        if let Err(e) = self.send(&message).await {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }

        let outcome = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    return Err(McpError::Timeout(limit));
                }
            },
            None => rx.await,
        };
        let result = outcome.map_err(|_| TransportError::Closed)??;
        Ok(serde_json::from_value(result)?)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.send(&JsonRpcMessage::notification(method, params)).await?;
        Ok(())
    }

    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        let _guard = self.send_lock.lock().await;
        self.transport.send(message).await
    }

    /// Tear down the transport. Outstanding requests fail.
    pub async fn close(&self) {
        self.transport.close().await;
    }

    pub fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.transport.is_alive()
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Route inbound traffic until the transport closes.
async fn dispatch(
    server_name: String,
    mut rx: mpsc::UnboundedReceiver<TransportEvent>,
    transport: Weak<dyn Transport>,
    pending: Pending,
    closed: Arc<AtomicBool>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            TransportEvent::Message(JsonRpcMessage::Response(response)) => {
                complete(&pending, response).await;
            }
            TransportEvent::Message(JsonRpcMessage::Request(request)) => {
                answer_server_request(&server_name, &transport, &request).await;
            }
            TransportEvent::Message(JsonRpcMessage::Notification(notification)) => {
                debug!(server = %server_name, method = %notification.method, "Server notification");
            }
            TransportEvent::Error(e) => {
                warn!(server = %server_name, error = %e, "Transport error");
            }
            TransportEvent::Closed => break,
        }
    }

    closed.store(true, Ordering::SeqCst);
    let drained: Vec<_> = pending.lock().await.drain().collect();
    if !drained.is_empty() {
        debug!(server = %server_name, count = drained.len(), "Failing outstanding requests");
    }
    for (_, tx) in drained {
        let _ = tx.send(Err(TransportError::Closed.into()));
    }
}

async fn complete(pending: &Pending, response: JsonRpcResponse) {
    let Some(id) = response.id else {
        if let Some(error) = response.error {
            warn!(code = error.code, message = %error.message, "Server reported an error without an id");
        }
        return;
    };
    let Some(tx) = pending.lock().await.remove(&id) else {
        trace!(%id, "Response for unknown or expired request");
        return;
    };
    let outcome = match (response.error, response.result) {
        (Some(error), _) => Err(McpError::Server {
            code: error.code,
            message: error.message,
        }),
        (None, Some(result)) => Ok(result),
        (None, None) => Ok(Value::Null),
    };
    let _ = tx.send(outcome);
}

/// Servers may ping the client; everything else is declined.
async fn answer_server_request(server_name: &str, transport: &Weak<dyn Transport>, request: &JsonRpcRequest) {
    let Some(transport) = transport.upgrade() else {
        return;
    };
    let reply = if request.method == "ping" {
        JsonRpcMessage::Response(JsonRpcResponse {
            jsonrpc: crate::jsonrpc::JSONRPC_VERSION.to_string(),
            id: Some(request.id.clone()),
            result: Some(json!({})),
            error: None,
        })
    } else {
        debug!(server = %server_name, method = %request.method, "Declining server request");
        JsonRpcMessage::error_response(
            request.id.clone(),
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", request.method),
        )
    };
    if let Err(e) = transport.send(&reply).await {
        warn!(server = %server_name, error = %e, "Failed to answer server request");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use toolmux_core::TransportKind;

    /// In-process server: answers requests through a handler closure.
    struct ScriptedTransport {
        events: Option<EventSink>,
        handler: Arc<dyn Fn(&JsonRpcRequest) -> Option<JsonRpcResponse> + Send + Sync>,
        sent: Arc<std::sync::Mutex<Vec<JsonRpcMessage>>>,
    }

    impl ScriptedTransport {
        fn new(
            handler: impl Fn(&JsonRpcRequest) -> Option<JsonRpcResponse> + Send + Sync + 'static,
        ) -> (Self, Arc<std::sync::Mutex<Vec<JsonRpcMessage>>>) {
            let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
            (
                Self {
                    events: None,
                    handler: Arc::new(handler),
                    sent: Arc::clone(&sent),
                },
                sent,
            )
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn start(&mut self, events: EventSink) -> Result<(), McpError> {
            self.events = Some(events);
            Ok(())
        }

        async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
            let events = self.events.as_ref().ok_or(TransportError::NotStarted)?;
            if events.is_closed() {
                return Err(TransportError::Closed);
            }
            self.sent.lock().unwrap().push(message.clone());
            if let JsonRpcMessage::Request(request) = message {
                if let Some(response) = (self.handler)(request) {
                    events.message(JsonRpcMessage::Response(response));
                }
            }
            Ok(())
        }

        async fn close(&self) {
            if let Some(events) = &self.events {
                events.close();
            }
        }

        fn is_alive(&self) -> bool {
            self.events.as_ref().is_some_and(|e| !e.is_closed())
        }

        fn kind(&self) -> TransportKind {
            TransportKind::Stdio
        }
    }

    fn ok(request: &JsonRpcRequest, result: Value) -> Option<JsonRpcResponse> {
        Some(JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: Some(request.id.clone()),
            result: Some(result),
            error: None,
        })
    }

    fn server(request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        match request.method.as_str() {
            "initialize" => ok(
                request,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": {"name": "fake", "version": "1.0"},
                    "capabilities": {"tools": {}}
                }),
            ),
            "tools/list" => {
                let cursor = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("cursor"))
                    .and_then(Value::as_str);
                match cursor {
                    None => ok(
                        request,
                        json!({"tools": [{"name": "search", "inputSchema": {"type": "object"}}], "nextCursor": "p2"}),
                    ),
                    Some("p2") => ok(request, json!({"tools": [{"name": "fetch", "description": "Fetch a URL"}]})),
                    Some(_) => ok(request, json!({"tools": []})),
                }
            }
            "tools/call" => ok(
                request,
                json!({"content": [{"type": "text", "text": "hi"}, {"type": "image", "mimeType": "image/png", "data": "AA=="}]}),
            ),
            "boom" => Some(JsonRpcResponse {
                jsonrpc: "2.0".into(),
                id: Some(request.id.clone()),
                result: None,
                error: Some(crate::jsonrpc::JsonRpcError {
                    code: -32000,
                    message: "exploded".into(),
                    data: None,
                }),
            }),
            _ => None,
        }
    }

    async fn connected() -> (McpClient, Arc<std::sync::Mutex<Vec<JsonRpcMessage>>>) {
        let (transport, sent) = ScriptedTransport::new(server);
        let mut client = McpClient::connect("fake", Box::new(transport)).await.unwrap();
        client.initialize("toolmux").await.unwrap();
        (client, sent)
    }

    #[tokio::test]
    async fn handshake_sends_initialized_notification() {
        let (client, sent) = connected().await;
        assert_eq!(client.server_info().map(|i| i.name.as_str()), Some("fake"));

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].method(), Some("initialize"));
        assert_eq!(sent[1].method(), Some("notifications/initialized"));
        assert!(sent[1].id().is_none());
    }

    #[tokio::test]
    async fn lists_tools_across_pages() {
        let (client, _) = connected().await;
        let tools = client.list_all_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["search", "fetch"]);
        assert_eq!(tools[1].description.as_deref(), Some("Fetch a URL"));
    }

    #[tokio::test]
    async fn decodes_call_results() {
        let (client, _) = connected().await;
        let result = client.call_tool("search", Map::new()).await.unwrap();
        assert_eq!(
            result.content,
            vec![
                ContentBlock::text("hi"),
                ContentBlock::Image {
                    mime_type: "image/png".into()
                }
            ]
        );
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn server_errors_are_surfaced() {
        let (client, _) = connected().await;
        let err = client.request::<Value>("boom", None).await.unwrap_err();
        assert!(matches!(err, McpError::Server { code: -32000, ref message } if message == "exploded"));
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        let (transport, _) = ScriptedTransport::new(server);
        let client = McpClient::connect("fake", Box::new(transport))
            .await
            .unwrap()
            .with_request_timeout(Duration::from_millis(50));
        let err = client.request::<Value>("silence", None).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout(_)));
    }

    #[tokio::test]
    async fn close_fails_outstanding_and_later_requests() {
        let (client, _) = connected().await;
        let client = Arc::new(client);
        let waiting = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request::<Value>("silence", None).await })
        };
        tokio::task::yield_now().await;
        client.close().await;

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::Transport(TransportError::Closed)));
        assert!(!client.is_alive());
        assert!(client.call_tool("search", Map::new()).await.is_err());
    }

    #[test]
    fn unknown_content_types_decode() {
        let result: CallToolResult =
            serde_json::from_value(json!({"content": [{"type": "hologram"}], "isError": true})).unwrap();
        assert_eq!(result.content, vec![ContentBlock::Unknown]);
        assert!(result.is_error);
    }
}
