//! Protocol sessions and the factory that opens them.
//!
//! The connection manager only sees [`ToolSession`] and [`SessionFactory`],
//! so it can be driven by in-process fakes in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use toolmux_core::{ServerConfig, TransportKind};
use tracing::{debug, info};

use crate::client::{CallToolResult, McpClient, ToolDefinition};
use crate::error::{McpError, TransportError};
use crate::resolver::EnvironmentResolver;
use crate::runtime::RuntimeContext;
use crate::transport::{
    SseTransport, StdioCommand, StdioLauncher, StdioTransport, StreamableHttpTransport, Transport,
    WebSocketTransport,
};

/// A live protocol session with one server.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Every tool the server advertises, all pages.
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, McpError>;

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<CallToolResult, McpError>;

    async fn close(&self);

    fn is_alive(&self) -> bool;
}

#[async_trait]
impl ToolSession for McpClient {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, McpError> {
        self.list_all_tools().await
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<CallToolResult, McpError> {
        Self::call_tool(self, name, arguments).await
    }

    async fn close(&self) {
        Self::close(self).await;
    }

    fn is_alive(&self) -> bool {
        Self::is_alive(self)
    }
}

/// Opens sessions for server configs.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Build the transport for `config`, start it and run the handshake.
    async fn open(&self, config: &ServerConfig) -> Result<Arc<dyn ToolSession>, McpError>;

    /// Drop resources shared between sessions. Called once every session
    /// is closed.
    async fn release(&self) {}
}

/// Production [`SessionFactory`]: picks the transport from the config's
/// kind and speaks MCP over it.
pub struct McpSessionFactory {
    resolver: Arc<EnvironmentResolver>,
    runtime: RuntimeContext,
    client_name: String,
    request_timeout: Option<Duration>,
    http: Mutex<Option<reqwest::Client>>,
}

impl McpSessionFactory {
    pub fn new(resolver: Arc<EnvironmentResolver>, runtime: RuntimeContext, client_name: impl Into<String>) -> Self {
        Self {
            resolver,
            runtime,
            client_name: client_name.into(),
            request_timeout: None,
            http: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// The HTTP client shared by all remote sessions, created on first use.
    async fn http_client(&self) -> Result<reqwest::Client, McpError> {
        let mut slot = self.http.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .user_agent(format!("{}/{}", self.client_name, env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(TransportError::from)?;
        *slot = Some(client.clone());
        Ok(client)
    }

    async fn build_transport(&self, config: &ServerConfig) -> Result<Box<dyn Transport>, McpError> {
        let url = || config.url.clone().unwrap_or_default();
        let transport: Box<dyn Transport> = match config.transport {
            TransportKind::Stdio => {
                let command = StdioCommand::from_config(config)?;
                let launcher = StdioLauncher::new(Arc::clone(&self.resolver), self.runtime.clone());
                Box::new(StdioTransport::new(config.name.clone(), command, launcher))
            }
            TransportKind::Sse => Box::new(SseTransport::new(url(), self.http_client().await?, config.headers.clone())),
            TransportKind::StreamableHttp => Box::new(StreamableHttpTransport::new(
                url(),
                self.http_client().await?,
                config.headers.clone(),
            )),
            TransportKind::WebSocket => Box::new(WebSocketTransport::new(url(), config.headers.clone())),
        };
        Ok(transport)
    }
}

#[async_trait]
impl SessionFactory for McpSessionFactory {
    async fn open(&self, config: &ServerConfig) -> Result<Arc<dyn ToolSession>, McpError> {
        config.validate()?;
        debug!(server_id = config.id, server_name = %config.name, transport = %config.transport, "Opening session");

        let transport = self.build_transport(config).await?;
        let mut client = McpClient::connect(config.name.clone(), transport).await?;
        if let Some(timeout) = self.request_timeout {
            client = client.with_request_timeout(timeout);
        }
        if let Err(e) = client.initialize(&self.client_name).await {
            client.close().await;
            return Err(e);
        }
        Ok(Arc::new(client))
    }

    async fn release(&self) {
        if self.http.lock().await.take().is_some() {
            info!("Released shared HTTP client");
        }
    }
}
