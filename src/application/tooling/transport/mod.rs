pub mod http;
pub mod sse;
pub mod stdio;

use super::error::TransportError;
use async_trait::async_trait;
use serde_json::{Value, json};

pub use http::HttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

/// JSON-RPC protocol revision spoken with tool servers.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// One channel carrying tool-protocol messages to a single server. The
/// connection layer owns exactly one transport per live connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the matching response, returning the
    /// JSON-RPC `result` payload. A JSON-RPC error response surfaces as
    /// [`TransportError::Rpc`].
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError>;

    /// Send a fire-and-forget notification.
    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError>;

    /// Tear down the underlying channel. Idempotent.
    async fn close(&self);
}

pub(crate) fn rpc_request(id: &str, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

pub(crate) fn rpc_notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}

/// Splits a JSON-RPC response envelope into its result, mapping an error
/// member onto [`TransportError::Rpc`].
pub(crate) fn unwrap_envelope(server: &str, envelope: Value) -> Result<Value, TransportError> {
    if let Some(error) = envelope.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(TransportError::Rpc {
            server: server.to_string(),
            code,
            message,
        });
    }
    Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
}

/// Stringified response id, used to key the pending-request maps.
pub(crate) fn response_key(id: &Value) -> Option<String> {
    match id {
        Value::String(value) => Some(value.clone()),
        Value::Number(num) => Some(num.to_string()),
        _ => None,
    }
}
