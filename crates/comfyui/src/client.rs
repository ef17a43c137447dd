//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the WebSocket URL of one ComfyUI instance.
//! Call [`ComfyUIClient::connect`] with the process [`ClientId`] to open a
//! live [`ComfyUIConnection`].

use std::fmt;

use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// The WebSocket stream type produced by [`ComfyUIClient::connect`].
pub type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Identifier this process presents to ComfyUI.
///
/// ComfyUI routes execution messages to the socket registered under the
/// same `client_id` that was sent with the prompt, so one id is generated
/// per process and shared by every job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a fresh UUID v4 client id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configuration handle for a ComfyUI instance's WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: WsStream,
}

impl ComfyUIClient {
    /// Create a new client.
    ///
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8188`.
    pub fn new(ws_url: String) -> Self {
        Self { ws_url }
    }

    /// Connect to the ComfyUI WebSocket endpoint.
    ///
    /// The `client_id` is appended as a query parameter so that ComfyUI
    /// addresses execution messages for our prompts to this socket.
    pub async fn connect(
        &self,
        client_id: &ClientId,
    ) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = format!("{}/ws?clientId={}", self.ws_url, client_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::debug!(client_id = %client_id, "Connected to ComfyUI at {}", self.ws_url);

        Ok(ComfyUIConnection { ws_stream })
    }
}

/// Derive the WebSocket base URL from an HTTP base URL.
///
/// `http://` becomes `ws://` and `https://` becomes `wss://`; a trailing
/// slash is dropped.
pub fn ws_url_from_api_url(api_url: &str) -> String {
    let trimmed = api_url.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{trimmed}")
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}
