//! JSON-RPC 2.0 protocol implementation over stdio.
//!
//! This module provides:
//! - JSON-RPC 2.0 request/response/notification types
//! - An outbox that serialises every outgoing line through one writer
//! - The stdin read loop

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{handle_method, SharedState};
use crate::error::RpcError;

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod rpc_tests;

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request identifier (null when the request could not be parsed).
    pub id: Value,
    /// The result on success (mutually exclusive with error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure (mutually exclusive with result).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code (negative for predefined errors).
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server-initiated message with no id.
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

/// Server information returned during initialization.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Capabilities advertised to clients.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    /// Whether `conversation/follow_up` notifications are sent.
    #[serde(rename = "followUpNotifications")]
    pub follow_up_notifications: bool,
    /// Methods this server answers.
    pub methods: Vec<String>,
}

/// Result of the initialize handshake.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: Capabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// Conversation methods routed to the handlers.
pub const CONVERSATION_METHODS: &[&str] = &[
    "conversation/start",
    "conversation/turn",
    "conversation/history",
];

/// Notification method for delayed check-ins.
pub const FOLLOW_UP_NOTIFICATION: &str = "conversation/follow_up";

const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_millis(500);

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Queue of serialized lines waiting to be written to stdout.
///
/// Responses and follow-up notifications share one writer so lines never
/// interleave.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<String>,
}

impl Outbox {
    /// Create an outbox and the receiving end the writer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue any serializable message. Returns false if the writer is gone.
    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        match serde_json::to_string(message) {
            Ok(line) => self.tx.send(line).is_ok(),
            Err(e) => {
                error!(error = %e, "Failed to serialize outgoing message");
                false
            }
        }
    }

    /// Queue a notification.
    pub fn notify(&self, method: &str, params: Value) -> bool {
        let sent = self.send(&JsonRpcNotification::new(method, params));
        if !sent {
            warn!(method = %method, "Notification dropped, writer closed");
        }
        sent
    }
}

/// Drain queued lines into `writer`, one per line, until every sender is dropped.
pub async fn write_lines<W>(mut rx: mpsc::UnboundedReceiver<String>, mut writer: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        debug!(message = %line, "Sending message");
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

/// SOS conversation server running over stdio.
pub struct RpcServer {
    state: SharedState,
    outbox: Outbox,
}

impl RpcServer {
    /// Create a server that queues its output on `outbox`.
    pub fn new(state: SharedState, outbox: Outbox) -> Self {
        Self { state, outbox }
    }

    /// Shared state behind this server.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Serve stdin/stdout until EOF.
    pub async fn serve_stdio(state: SharedState) -> std::io::Result<()> {
        let (outbox, rx) = Outbox::channel();
        let writer = tokio::spawn(write_lines(rx, tokio::io::stdout()));

        let server = Self::new(state, outbox);
        let served = server.run(tokio::io::stdin()).await;
        drop(server);

        // Pending follow-ups still hold outbox clones, so the writer only
        // gets a short grace period to flush queued responses.
        match tokio::time::timeout(SHUTDOWN_GRACE, writer).await {
            Ok(Ok(Err(e))) => error!(error = %e, "Writer failed"),
            Ok(_) => {}
            Err(_) => debug!("Writer still open at shutdown, pending follow-ups dropped"),
        }
        served
    }

    /// Read newline-delimited requests from `input` until EOF.
    pub async fn run<R>(&self, input: R) -> std::io::Result<()>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        info!("SOS coach server starting...");

        let mut reader = BufReader::new(input);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            // EOF reached
            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!(request = %trimmed, "Received request");

            let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    error!(error = %e, "Failed to parse request");
                    Some(JsonRpcResponse::error(
                        None,
                        -32700,
                        format!("Parse error: {}", e),
                    ))
                }
            };

            // Notifications get no response
            if let Some(response) = response {
                self.outbox.send(&response);
            }
        }

        Ok(())
    }

    /// Handle a single JSON-RPC request.
    /// Returns None for notifications (requests without id).
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        if request.jsonrpc != "2.0" && !is_notification {
            let err = RpcError::InvalidRequest {
                message: format!("unsupported jsonrpc version '{}'", request.jsonrpc),
            };
            return Some(JsonRpcResponse::error(request.id, err.code(), err.to_string()));
        }

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" | "notifications/cancelled" => {
                debug!(method = %request.method, "Received notification");
                None
            }
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method if is_notification => {
                debug!(method = %method, "Notification ignored");
                None
            }
            method => {
                let result = handle_method(&self.state, &self.outbox, method, request.params).await;
                Some(match result {
                    Ok(value) => JsonRpcResponse::success(request.id, value),
                    Err(e) => {
                        warn!(method = %method, error = %e, "Request failed");
                        JsonRpcResponse::error(request.id, e.code(), e.to_string())
                    }
                })
            }
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            protocol_version: "1.0".to_string(),
            capabilities: Capabilities {
                follow_up_notifications: true,
                methods: CONVERSATION_METHODS.iter().map(|m| m.to_string()).collect(),
            },
            server_info: ServerInfo {
                name: "sos-coach".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }
}
