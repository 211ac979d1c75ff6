use crate::transport::{ReadStream, WriteStream};
use anyhow::{anyhow, Context, Result};
use mcp_core::protocol::*;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

type ResponseSender = mpsc::Sender<Result<Option<JsonRpcMessage>>>;

struct OutgoingMessage {
    message: JsonRpcMessage,
    response_tx: ResponseSender,
}

/// A JSON-RPC session over a connected transport.
///
/// A background task owns both channels: it writes outgoing messages, remembers which
/// request ids are pending, and routes each incoming response back to its caller. Any
/// transport failure fails every pending request and closes the session for good.
pub struct Session {
    request_tx: mpsc::Sender<OutgoingMessage>,
    id_counter: AtomicU64,
    shutdown_tx: mpsc::Sender<()>,
    background_task: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    is_closed: Arc<AtomicBool>,
}

impl Session {
    pub async fn new(read_stream: ReadStream, write_stream: WriteStream) -> Result<Self> {
        let (request_tx, mut request_rx) = mpsc::channel::<OutgoingMessage>(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let is_closed = Arc::new(AtomicBool::new(false));
        let is_closed_clone = is_closed.clone();

        let background_task = Arc::new(Mutex::new(Some(tokio::spawn(async move {
            let mut pending_requests: Vec<(u64, ResponseSender)> = Vec::new();
            let mut read_stream = read_stream;
            let write_stream = write_stream;

            loop {
                tokio::select! {
                    Some(()) = shutdown_rx.recv() => {
                        for (_, tx) in pending_requests {
                            let _ = tx.send(Err(anyhow!("Session shutdown"))).await;
                        }
                        break;
                    }

                    Some(outgoing) = request_rx.recv() => {
                        if is_closed_clone.load(Ordering::SeqCst) {
                            let _ = outgoing.response_tx.send(Err(anyhow!("Session is closed"))).await;
                            continue;
                        }

                        if let Err(e) = write_stream.send(outgoing.message.clone()).await {
                            debug!("Write error occurred: {}", e);
                            is_closed_clone.store(true, Ordering::SeqCst);
                            break;
                        }

                        match outgoing.message {
                            JsonRpcMessage::Request(JsonRpcRequest { id: Some(id), .. }) => {
                                pending_requests.push((id, outgoing.response_tx));
                            }
                            _ => {
                                let _ = outgoing.response_tx.send(Ok(None)).await;
                            }
                        }
                    }

                    Some(message_result) = read_stream.recv() => {
                        match message_result {
                            Ok(message) => match message.response_id() {
                                Some(id) => {
                                    if let Some(pos) = pending_requests.iter().position(|(req_id, _)| *req_id == id) {
                                        let (_, tx) = pending_requests.remove(pos);
                                        let _ = tx.send(Ok(Some(message))).await;
                                    } else {
                                        warn!("Received response for unknown request id {}", id);
                                    }
                                }
                                None => debug!("Ignoring server-initiated message: {:?}", message),
                            },
                            Err(e) => {
                                warn!("Transport error: {}", e);
                                for (_, tx) in pending_requests {
                                    let _ = tx.send(Err(anyhow!("{}", e))).await;
                                }
                                is_closed_clone.store(true, Ordering::SeqCst);
                                break;
                            }
                        }
                    }

                    else => break,
                }
            }
        }))));

        Ok(Self {
            request_tx,
            id_counter: AtomicU64::new(1),
            shutdown_tx,
            background_task,
            is_closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::SeqCst)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.is_closed.store(true, Ordering::SeqCst);

        // The background task may already be gone after a transport error
        let _ = self.shutdown_tx.send(()).await;

        if let Some(task) = self.background_task.lock().await.take() {
            task.await
                .map_err(|e| anyhow!("Background task failed: {}", e))?;
        }

        Ok(())
    }

    async fn send_message(&self, message: JsonRpcMessage) -> Result<Option<JsonRpcMessage>> {
        if self.is_closed() {
            return Err(anyhow!("Session is closed"));
        }

        let (response_tx, mut response_rx) = mpsc::channel(1);

        self.request_tx
            .send(OutgoingMessage {
                message,
                response_tx,
            })
            .await
            .context("Failed to send message")?;

        response_rx
            .recv()
            .await
            .context("Failed to receive response")?
    }

    async fn rpc_call<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T> {
        if self.is_closed() {
            return Err(anyhow!("Session is closed"));
        }

        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method: method.to_string(),
            params,
        };

        let response = self
            .send_message(JsonRpcMessage::Request(request))
            .await?
            .context("Expected response for request")?;

        match response {
            JsonRpcMessage::Response(JsonRpcResponse {
                error: Some(error), ..
            })
            | JsonRpcMessage::Error(JsonRpcError { error, .. }) => {
                Err(anyhow!("RPC Error {}: {}", error.code, error.message))
            }
            JsonRpcMessage::Response(JsonRpcResponse {
                result: Some(result),
                ..
            }) => serde_json::from_value(result).context("Failed to deserialize result"),
            _ => Err(anyhow!("No result in response")),
        }
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        if self.is_closed() {
            return Err(anyhow!("Session is closed"));
        }

        let notification = JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        };

        self.send_message(JsonRpcMessage::Notification(notification))
            .await?;

        Ok(())
    }

    pub async fn initialize(&self) -> Result<InitializeResult> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let result: InitializeResult = self.rpc_call("initialize", Some(params)).await?;
        self.send_notification("notifications/initialized", None)
            .await?;
        Ok(result)
    }

    pub async fn list_tools(&self) -> Result<ListToolsResult> {
        self.rpc_call("tools/list", Some(json!({}))).await
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.rpc_call(
            "tools/call",
            Some(json!({
                "name": name,
                "arguments": arguments,
            })),
        )
        .await
    }
}
