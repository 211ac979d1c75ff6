use crate::transport::{ReadStream, Transport, WriteStream};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use mcp_core::protocol::JsonRpcMessage;
use reqwest::header::HeaderMap;
use reqwest::{Client, Url};
use reqwest_eventsource::{Event, EventSource};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, error, info, warn};

const DEFAULT_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SseTransportParams {
    pub url: String,
    pub headers: Option<HeaderMap>,
    /// How long to wait for the server's `endpoint` event before giving up
    pub endpoint_timeout: Duration,
}

impl SseTransportParams {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            headers: None,
            endpoint_timeout: DEFAULT_ENDPOINT_TIMEOUT,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_endpoint_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint_timeout = timeout;
        self
    }
}

/// Receives server messages over Server-Sent Events and posts client messages to the
/// endpoint the server announces.
pub struct SseTransport {
    pub params: SseTransportParams,
}

impl SseTransport {
    pub fn new(params: SseTransportParams) -> Self {
        Self { params }
    }
}

// Helper function to send a POST request with retry logic
async fn send_with_retry(
    client: &Client,
    endpoint: &Url,
    headers: &HeaderMap,
    json: serde_json::Value,
) -> Result<reqwest::Response> {
    let retry_strategy = ExponentialBackoff::from_millis(100)
        .factor(2)
        .map(jitter)
        .take(3); // 4 attempts total

    Retry::spawn(retry_strategy, || async {
        let response = client
            .post(endpoint.clone())
            .headers(headers.clone())
            .json(&json)
            .send()
            .await?;

        if response.status().is_server_error() {
            return Err(anyhow!("Server error: {}", response.status()));
        }

        Ok(response)
    })
    .await
}

/// Resolve the payload of an `endpoint` event against the SSE url.
///
/// The server may announce either an absolute url or a path; either way the result must
/// share scheme, host and port with the url the event stream was opened on.
pub fn resolve_endpoint(base_url: &Url, endpoint: &str) -> Result<Url> {
    let endpoint = endpoint.trim();
    let endpoint_url = Url::parse(endpoint)
        .or_else(|_| base_url.join(endpoint))
        .with_context(|| format!("Failed to parse endpoint URL: {}", endpoint))?;

    if base_url.scheme() != endpoint_url.scheme()
        || base_url.host_str() != endpoint_url.host_str()
        || base_url.port_or_known_default() != endpoint_url.port_or_known_default()
    {
        return Err(anyhow!(
            "Endpoint origin does not match connection origin: {}",
            endpoint_url
        ));
    }

    Ok(endpoint_url)
}

async fn wait_for_endpoint(event_source: &mut EventSource, base_url: &Url) -> Result<Url> {
    while let Some(event) = event_source.next().await {
        match event {
            Ok(Event::Open) => info!("SSE connection opened"),
            Ok(Event::Message(message)) if message.event == "endpoint" => {
                info!("Received endpoint URL: {}", message.data);
                return resolve_endpoint(base_url, &message.data);
            }
            Ok(Event::Message(message)) => {
                warn!("Received {} event before endpoint URL", message.event);
            }
            Err(e) => return Err(anyhow!("SSE error: {}", e)),
        }
    }
    Err(anyhow!("SSE stream ended before an endpoint was announced"))
}

#[async_trait]
impl Transport for SseTransport {
    async fn connect(&self) -> Result<(ReadStream, WriteStream)> {
        info!("Connecting to SSE endpoint: {}", self.params.url);
        let (tx_read, rx_read) = mpsc::channel(100);
        let (tx_write, mut rx_write) = mpsc::channel::<JsonRpcMessage>(100);

        let client = Client::new();
        let base_url = Url::parse(&self.params.url).context("Failed to parse SSE URL")?;
        let headers = self.params.headers.clone().unwrap_or_default();

        let request_builder = client.get(base_url.clone()).headers(headers.clone());
        let mut event_source = EventSource::new(request_builder)
            .map_err(|e| anyhow!("Failed to open event stream: {:?}", e))?;

        let endpoint = match tokio::time::timeout(
            self.params.endpoint_timeout,
            wait_for_endpoint(&mut event_source, &base_url),
        )
        .await
        {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(e)) => {
                event_source.close();
                return Err(e);
            }
            Err(_) => {
                event_source.close();
                return Err(anyhow!(
                    "Timed out waiting for endpoint event from {}",
                    base_url
                ));
            }
        };
        info!("Using full endpoint URL: {}", endpoint);

        // Spawn the SSE reader task
        tokio::spawn({
            let tx_read = tx_read.clone();
            async move {
                debug!("Starting SSE reader task");
                while let Some(event) = event_source.next().await {
                    match event {
                        Ok(Event::Open) => debug!("SSE connection reopened"),
                        Ok(Event::Message(message)) => match message.event.as_str() {
                            "message" => {
                                match serde_json::from_str::<JsonRpcMessage>(&message.data) {
                                    Ok(msg) => {
                                        debug!("Received server message: {:?}", msg);
                                        if tx_read.send(Ok(msg)).await.is_err() {
                                            debug!("Read channel closed, stopping SSE reader");
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        error!("Error parsing server message: {}", e);
                                        if tx_read.send(Err(e.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                            other => debug!("Ignoring SSE event type: {}", other),
                        },
                        Err(e) => {
                            error!("SSE error: {}", e);
                            let _ = tx_read.send(Err(anyhow!("SSE error: {}", e))).await;
                            break;
                        }
                    }
                }
                event_source.close();
                debug!("SSE reader task ended");
            }
        });

        // Spawn the writer task
        tokio::spawn(async move {
            debug!("Starting post writer with endpoint URL: {}", endpoint);
            while let Some(message) = rx_write.recv().await {
                let json = match serde_json::to_value(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                debug!("Sending client message: {}", json);
                let failure = match send_with_retry(&client, &endpoint, &headers, json).await {
                    Ok(response) if response.status().is_success() => None,
                    Ok(response) => {
                        let status = response.status();
                        let text = response.text().await.unwrap_or_default();
                        Some(anyhow!("Server returned error status {}: {}", status, text))
                    }
                    Err(e) => Some(anyhow!("Failed to send message after retries: {}", e)),
                };
                // Responses only ever arrive on the event stream, so a rejected post
                // would otherwise leave its caller waiting forever.
                if let Some(e) = failure {
                    error!("{}", e);
                    if tx_read.send(Err(e)).await.is_err() {
                        break;
                    }
                }
            }
            debug!("Writer task ended");
        });

        info!("SSE transport connected");
        Ok((rx_read, tx_write))
    }
}
