pub mod config;
pub mod connection;
pub mod conversation;
pub mod errors;
pub mod extractor;
pub mod host;
pub mod message;
pub mod prompt_template;
pub mod providers;
pub mod registry;

#[cfg(test)]
mod test_helpers;

pub use config::{CompletionConfig, HostConfig, ServerTarget};
pub use connection::{Connector, SseConnector};
pub use errors::{HostError, HostResult, ToolError};
pub use host::McpHost;
pub use providers::SamplingParams;
pub use registry::ToolDescriptor;
