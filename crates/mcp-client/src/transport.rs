use anyhow::Result;
use async_trait::async_trait;
use mcp_core::protocol::JsonRpcMessage;
use tokio::sync::mpsc::{Receiver, Sender};

// Stream types for consistent interface
pub type ReadStream = Receiver<Result<JsonRpcMessage>>;
pub type WriteStream = Sender<JsonRpcMessage>;

/// A way of reaching a server: yields a pair of channels once the connection is usable.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<(ReadStream, WriteStream)>;
}
