use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder};
use reqwest_eventsource::{Event, EventSource};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::base::{FragmentStream, Provider, SamplingParams};
use super::errors::ProviderError;
use super::utils::{
    chunk_delta_text, first_choice_text, handle_response, non_ok_response_to_provider_error,
};
use crate::config::CompletionConfig;
use crate::message::Message;

const STREAM_DONE: &str = "[DONE]";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(flatten)]
    params: &'a SamplingParams,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

/// Chat completions against an OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct OpenAiProvider {
    client: Client,
    host: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(config: CompletionConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self {
            client,
            host: config.host,
            api_key: config.api_key,
            model: config.model,
        })
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        let config = CompletionConfig::from_env().ok_or_else(|| {
            ProviderError::Authentication("OPENAI_API_KEY is not set".to_string())
        })?;
        Self::new(config)
    }

    fn create_request(
        &self,
        messages: &[Message],
        params: &SamplingParams,
        stream: bool,
    ) -> Result<Value, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            params,
            stream,
        };
        serde_json::to_value(&request).map_err(|e| ProviderError::RequestFailed(e.to_string()))
    }

    fn request(&self, payload: &Value) -> RequestBuilder {
        let url = format!("{}/v1/chat/completions", self.host.trim_end_matches('/'));
        self.client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(payload)
    }

    async fn post(&self, payload: &Value) -> Result<Value, ProviderError> {
        let response = self.request(payload).send().await?;
        handle_response(payload, response).await
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn model(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(
        skip(self, messages, params),
        fields(messages = messages.len())
    )]
    async fn complete(
        &self,
        messages: &[Message],
        params: &SamplingParams,
    ) -> Result<String, ProviderError> {
        let payload = self.create_request(messages, params, false)?;
        let response = self.post(&payload).await?;
        let text = first_choice_text(&response)?;
        debug!(model = %self.model, output = %text, "completion received");
        Ok(text)
    }

    #[tracing::instrument(
        skip(self, messages, params),
        fields(messages = messages.len())
    )]
    async fn stream(
        &self,
        messages: &[Message],
        params: &SamplingParams,
    ) -> Result<FragmentStream, ProviderError> {
        let payload = self.create_request(messages, params, true)?;
        let event_source = EventSource::new(self.request(&payload))
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        Ok(Box::pin(fragments(event_source, payload)))
    }
}

fn fragments(
    mut event_source: EventSource,
    payload: Value,
) -> impl Stream<Item = Result<String, ProviderError>> + Send + 'static {
    try_stream! {
        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => debug!("completion stream opened"),
                Ok(Event::Message(message)) => {
                    if message.data.trim() == STREAM_DONE {
                        break;
                    }
                    let chunk: Value = serde_json::from_str(&message.data)
                        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
                    if let Some(text) = chunk_delta_text(&chunk) {
                        yield text.to_string();
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(_, response)) => {
                    event_source.close();
                    Err(non_ok_response_to_provider_error(&payload, response).await)?;
                }
                Err(e) => {
                    event_source.close();
                    Err(ProviderError::RequestFailed(e.to_string()))?;
                }
            }
        }
        event_source.close();
    }
}
