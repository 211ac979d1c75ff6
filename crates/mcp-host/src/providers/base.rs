use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use super::errors::ProviderError;
use crate::message::Message;

/// Sampling options forwarded to the completion service as given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl SamplingParams {
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Incremental text of a streamed completion, in arrival order.
pub type FragmentStream = BoxStream<'static, Result<String, ProviderError>>;

/// Base trait for chat completion services
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name of the model completions are requested from
    fn model(&self) -> &str;

    /// Generate the full assistant reply to `messages`
    async fn complete(
        &self,
        messages: &[Message],
        params: &SamplingParams,
    ) -> Result<String, ProviderError>;

    /// Generate the assistant reply to `messages` as a stream of text fragments
    ///
    /// The returned stream is finished when the reply is complete. Concatenating every
    /// fragment yields the same text `complete` would have returned.
    async fn stream(
        &self,
        messages: &[Message],
        params: &SamplingParams,
    ) -> Result<FragmentStream, ProviderError>;
}
