use reqwest::{Response, StatusCode};
use serde_json::Value;

use crate::providers::errors::ProviderError;

// Maps a non-ok response status to a ProviderError
pub async fn non_ok_response_to_provider_error(
    payload: &Value,
    response: Response,
) -> ProviderError {
    let status = response.status();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Authentication(format!("Authentication failed. Please ensure your API key is valid. \
                Status: {}. Response: {:?}", status, response.text().await.unwrap_or_default()))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::RateLimitExceeded(format!("Rate limit exceeded. Please retry after some time. Status: {}", status))
        }
        StatusCode::INTERNAL_SERVER_ERROR | StatusCode::SERVICE_UNAVAILABLE => {
            ProviderError::ServerError(format!("Server error occurred. Status: {}", status))
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(
                "Provider request failed with status: {}. Body: {:?}. Payload: {}", status, body, payload
            );
            if let Some(err) = context_length_error(&body) {
                return err;
            }
            ProviderError::RequestFailed(format!("Request failed with status: {}.", status))
        }
    }
}

pub async fn handle_response(payload: &Value, response: Response) -> Result<Value, ProviderError> {
    match response.status() {
        StatusCode::OK => Ok(response.json().await?),
        _ => Err(non_ok_response_to_provider_error(payload, response).await),
    }
}

/// Recognizes the OpenAI-style `context_length_exceeded` error body.
fn context_length_error(body: &str) -> Option<ProviderError> {
    let error: Value = serde_json::from_str(body).ok()?;
    let error = error.get("error")?;
    if error.get("code").and_then(Value::as_str) == Some("context_length_exceeded") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("context length exceeded");
        Some(ProviderError::ContextLengthExceeded(message.to_string()))
    } else {
        None
    }
}

/// Text of the first choice of a buffered chat completion.
pub fn first_choice_text(response: &Value) -> Result<String, ProviderError> {
    if let Some(error) = response.get("error") {
        return Err(ProviderError::RequestFailed(format!(
            "OpenAI API error: {}",
            error
        )));
    }
    match response.pointer("/choices/0/message/content") {
        Some(Value::String(text)) => Ok(text.clone()),
        // content is null when the model answered with nothing but native tool calls
        Some(Value::Null) => Ok(String::new()),
        _ => Err(ProviderError::InvalidResponse(format!(
            "missing choices[0].message.content in {}",
            response
        ))),
    }
}

/// Text carried by one streamed chat completion chunk, if any.
pub fn chunk_delta_text(chunk: &Value) -> Option<&str> {
    chunk
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
}
