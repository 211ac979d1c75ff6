pub mod client;
pub mod session;
pub mod sse_transport;
pub mod transport;

pub use client::{Error, McpClient, SessionClient};
pub use session::Session;
pub use sse_transport::{SseTransport, SseTransportParams};
pub use transport::Transport;
