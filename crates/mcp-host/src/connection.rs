use async_trait::async_trait;
use mcp_client::{Error, McpClient, SessionClient, SseTransport, SseTransportParams};
use mcp_core::protocol::CallToolResult;
use mcp_core::tool::Tool;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{error, info, warn};

use crate::config::ServerTarget;

/// Opens an initialized client for a server target.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &ServerTarget) -> Result<Box<dyn McpClient>, Error>;
}

/// Connects over SSE and performs the MCP initialize handshake.
#[derive(Debug, Default, Clone, Copy)]
pub struct SseConnector;

fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, Error> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| Error::Transport(format!("invalid header name {}: {}", key, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::Transport(format!("invalid value for header {}: {}", key, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl Connector for SseConnector {
    async fn connect(&self, target: &ServerTarget) -> Result<Box<dyn McpClient>, Error> {
        let mut params = SseTransportParams::new(&target.url);
        if let Some(headers) = &target.headers {
            params = params.with_headers(header_map(headers)?);
        }

        let client = SessionClient::connect(&SseTransport::new(params)).await?;
        if let Err(e) = client.initialize().await {
            let _ = client.close().await;
            return Err(e);
        }
        Ok(Box::new(client))
    }
}

/// A configured server and, once connected, the client talking to it.
pub struct Connection {
    target: ServerTarget,
    client: Option<Box<dyn McpClient>>,
}

impl Connection {
    pub fn new(target: ServerTarget) -> Self {
        Self {
            target,
            client: None,
        }
    }

    pub fn target(&self) -> &ServerTarget {
        &self.target
    }

    pub fn display_name(&self) -> &str {
        self.target.display_name()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// (Re)opens the client. A failure leaves the connection unconnected.
    pub async fn connect(&mut self, connector: &dyn Connector) -> bool {
        self.close().await;
        match connector.connect(&self.target).await {
            Ok(client) => {
                info!("Connected to {}", self.target);
                self.client = Some(client);
                true
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", self.target, e);
                false
            }
        }
    }

    fn client(&self) -> Result<&dyn McpClient, Error> {
        self.client.as_deref().ok_or(Error::NotConnected)
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>, Error> {
        Ok(self.client()?.list_tools().await?.tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, Error> {
        self.client()?.call_tool(name, arguments).await
    }

    pub async fn close(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.close().await {
                warn!("Error closing connection to {}: {}", self.target, e);
            }
        }
    }
}
