use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::base::{FragmentStream, Provider, SamplingParams};
use super::errors::ProviderError;
use crate::message::Message;

/// A mock provider that returns pre-configured responses for testing
///
/// Every call records the messages it was given. Once the scripted responses run out
/// the provider keeps answering with an empty text.
#[derive(Clone, Default)]
pub struct MockProvider {
    responses: Arc<Mutex<VecDeque<String>>>,
    calls: Arc<Mutex<Vec<Vec<Message>>>>,
    chunk_size: usize,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Arc::new(Mutex::new(responses.into_iter().map(Into::into).collect())),
            calls: Arc::default(),
            chunk_size: 4,
        }
    }

    /// Streamed responses are split into fragments of this many characters
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// The message lists of every call so far, oldest first
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next_response(&self, messages: &[Message]) -> String {
        self.calls.lock().unwrap().push(messages.to_vec());
        self.responses.lock().unwrap().pop_front().unwrap_or_default()
    }
}

/// Splits `text` into pieces of at most `size` characters.
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[async_trait]
impl Provider for MockProvider {
    fn model(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        messages: &[Message],
        _params: &SamplingParams,
    ) -> Result<String, ProviderError> {
        Ok(self.next_response(messages))
    }

    async fn stream(
        &self,
        messages: &[Message],
        _params: &SamplingParams,
    ) -> Result<FragmentStream, ProviderError> {
        let response = self.next_response(messages);
        let fragments = chunk_text(&response, self.chunk_size)
            .into_iter()
            .map(Ok::<String, ProviderError>);
        Ok(Box::pin(futures::stream::iter(fragments)))
    }
}
