use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::connection::Connection;

/// A tool as advertised to the model, tagged with the server that provides it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    /// Display name of the providing connection
    pub server: String,
}

/// Lists the tools of every connection concurrently and merges them.
///
/// Order follows the connections, then each server's own listing. A connection that
/// fails to list contributes nothing. Duplicate names are kept.
pub async fn aggregate_tools(connections: &[Connection]) -> Vec<ToolDescriptor> {
    let listings = join_all(connections.iter().map(|connection| async move {
        match connection.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(
                    "Failed to list tools from {}: {}",
                    connection.display_name(),
                    e
                );
                Vec::new()
            }
        }
    }))
    .await;

    connections
        .iter()
        .zip(listings)
        .flat_map(|(connection, tools)| {
            let server = connection.display_name().to_string();
            tools.into_iter().map(move |tool| ToolDescriptor {
                name: tool.name,
                description: tool.description,
                input_schema: tool.input_schema,
                server: server.clone(),
            })
        })
        .collect()
}

/// Index of the first connection, in configuration order, that lists `name`.
pub async fn resolve_owner(connections: &[Connection], name: &str) -> Option<usize> {
    for (index, connection) in connections.iter().enumerate() {
        match connection.list_tools().await {
            Ok(tools) if tools.iter().any(|tool| tool.name == name) => {
                debug!("Tool {} resolved to {}", name, connection.display_name());
                return Some(index);
            }
            Ok(_) => {}
            Err(e) => debug!(
                "Skipping {} while resolving {}: {}",
                connection.display_name(),
                name,
                e
            ),
        }
    }
    None
}
