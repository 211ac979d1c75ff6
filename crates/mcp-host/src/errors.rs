use thiserror::Error;

use crate::providers::errors::ProviderError;

/// Errors that end a call into the host.
///
/// Failures of individual connections or tool calls never show up here; they are folded
/// into the conversation instead (see [`ToolError`]).
#[derive(Error, Debug)]
pub enum HostError {
    #[error("No completion service configured: set a host and API key")]
    Configuration,

    #[error("No servers configured")]
    NoConnections,

    #[error("Failed to connect to any of the {attempted} configured servers")]
    AllConnectionsFailed { attempted: usize },

    #[error("Failed to render system prompt: {0}")]
    Prompt(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Model kept requesting tools after {0} rounds")]
    MaxRoundsExceeded(usize),
}

impl From<minijinja::Error> for HostError {
    fn from(err: minijinja::Error) -> Self {
        HostError::Prompt(err.to_string())
    }
}

pub type HostResult<T> = Result<T, HostError>;

/// A failed tool call. Recoverable: reported back to the model as a message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Execution(String),
}

impl From<mcp_client::Error> for ToolError {
    fn from(err: mcp_client::Error) -> Self {
        ToolError::Execution(err.to_string())
    }
}
