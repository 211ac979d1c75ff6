use async_trait::async_trait;
use mcp_client::{Error, McpClient};
use mcp_core::content::Content;
use mcp_core::protocol::{
    CallToolResult, Implementation, InitializeResult, ListToolsResult, ServerCapabilities,
};
use mcp_core::tool::Tool;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::ServerTarget;
use crate::connection::Connector;

/// Tools a fake server exposes.
///
/// Calls answer with `"<server>:<arguments json>"`, except `explode` which fails and
/// `picture` which returns an image.
#[derive(Clone, Default)]
pub struct MockServer {
    tools: Vec<String>,
    failing_list: bool,
}

impl MockServer {
    pub fn new<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tools: tools.into_iter().map(Into::into).collect(),
            failing_list: false,
        }
    }

    pub fn failing_list(mut self) -> Self {
        self.failing_list = true;
        self
    }
}

/// Record of one tool call: server label, tool name, arguments.
pub type CallRecord = (String, String, Value);

struct MockClient {
    label: String,
    url: String,
    server: MockServer,
    calls: Arc<Mutex<Vec<CallRecord>>>,
    closed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl McpClient for MockClient {
    async fn initialize(&self) -> Result<InitializeResult, Error> {
        Ok(InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: ServerCapabilities::default(),
            server_info: Implementation {
                name: self.label.clone(),
                version: "0.0.0".to_string(),
            },
        })
    }

    async fn list_tools(&self) -> Result<ListToolsResult, Error> {
        if self.server.failing_list {
            return Err(Error::Request("list failed".to_string()));
        }
        Ok(ListToolsResult {
            tools: self
                .server
                .tools
                .iter()
                .map(|name| {
                    Tool::new(
                        name.as_str(),
                        format!("The {} tool", name),
                        json!({"type": "object"}),
                    )
                })
                .collect(),
        })
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, Error> {
        self.calls
            .lock()
            .unwrap()
            .push((self.label.clone(), name.to_string(), arguments.clone()));
        match name {
            "explode" => Err(Error::Request("boom".to_string())),
            "picture" => Ok(CallToolResult {
                content: vec![Content::image("aGk=", "image/png"), Content::text("caption")],
                is_error: false,
            }),
            _ => Ok(CallToolResult {
                content: vec![Content::text(format!("{}:{}", self.label, arguments))],
                is_error: false,
            }),
        }
    }

    async fn close(&self) -> Result<(), Error> {
        self.closed.lock().unwrap().push(self.url.clone());
        Ok(())
    }
}

/// Hands out [`MockClient`]s keyed by target url. Unknown urls fail to connect.
#[derive(Clone, Default)]
pub struct MockConnector {
    servers: HashMap<String, MockServer>,
    calls: Arc<Mutex<Vec<CallRecord>>>,
    closed: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server<S: Into<String>>(mut self, url: S, server: MockServer) -> Self {
        self.servers.insert(url.into(), server);
        self
    }

    pub fn with_failure<S: Into<String>>(mut self, url: S) -> Self {
        self.servers.remove(&url.into());
        self
    }

    /// Tool calls across every client, in call order
    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap().clone()
    }

    /// Urls of closed clients, in close order
    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &ServerTarget) -> Result<Box<dyn McpClient>, Error> {
        let server = self
            .servers
            .get(&target.url)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("connection refused: {}", target.url)))?;
        Ok(Box::new(MockClient {
            label: target.display_name().to_string(),
            url: target.url.clone(),
            server,
            calls: self.calls.clone(),
            closed: self.closed.clone(),
        }))
    }
}
