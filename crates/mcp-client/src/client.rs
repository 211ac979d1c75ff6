use async_trait::async_trait;
use mcp_core::protocol::{CallToolResult, InitializeResult, ListToolsResult};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::session::Session;
use crate::transport::Transport;

/// Error type for MCP client operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Client is closed")]
    Closed,

    #[error("Not connected")]
    NotConnected,
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Request(format!("{:#}", err))
    }
}

/// The MCP client trait defining the interface for MCP operations.
#[async_trait]
pub trait McpClient: Send + Sync {
    /// Initialize the connection with the server.
    async fn initialize(&self) -> Result<InitializeResult, Error>;

    /// List available tools.
    async fn list_tools(&self) -> Result<ListToolsResult, Error>;

    /// Call a specific tool with arguments.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, Error>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<(), Error>;
}

/// [`McpClient`] over a JSON-RPC [`Session`].
pub struct SessionClient {
    session: Session,
}

impl SessionClient {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Connect the transport and start a session on it, without initializing.
    pub async fn connect<T: Transport + ?Sized>(transport: &T) -> Result<Self, Error> {
        let (read_stream, write_stream) = transport
            .connect()
            .await
            .map_err(|e| Error::Transport(format!("{:#}", e)))?;
        let session = Session::new(read_stream, write_stream).await?;
        Ok(Self::new(session))
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.session.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl McpClient for SessionClient {
    async fn initialize(&self) -> Result<InitializeResult, Error> {
        self.ensure_open()?;
        let result = self.session.initialize().await?;
        debug!(
            "Initialized session with {} {}",
            result.server_info.name, result.server_info.version
        );
        Ok(result)
    }

    async fn list_tools(&self) -> Result<ListToolsResult, Error> {
        self.ensure_open()?;
        Ok(self.session.list_tools().await?)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, Error> {
        self.ensure_open()?;
        Ok(self.session.call_tool(name, arguments).await?)
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(self.session.shutdown().await?)
    }
}
