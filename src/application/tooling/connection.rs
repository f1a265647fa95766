use super::error::TransportError;
use super::transport::{PROTOCOL_VERSION, Transport};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, warn};

/// Last-known responsiveness of a connection. Updated by failed calls and
/// read by the pool's health-checked acquisition path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Unknown,
    Healthy,
    Unhealthy,
}

impl Health {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Health::Healthy,
            2 => Health::Unhealthy,
            _ => Health::Unknown,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Health::Unknown => 0,
            Health::Healthy => 1,
            Health::Unhealthy => 2,
        }
    }
}

/// A tool as the server describes it, before catalog normalization.
#[derive(Debug, Clone)]
pub struct RawTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
}

/// One live transport to one tool server. The pool owns its lifetime
/// exclusively; callers get shared handles and never mutate it in place.
pub struct Connection {
    server: String,
    transport: Box<dyn Transport>,
    health: AtomicU8,
    created_at: DateTime<Utc>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("server", &self.server)
            .field("health", &self.health)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wrap a freshly connected transport and perform the tool-protocol
    /// handshake. On handshake failure the transport is closed before the
    /// error surfaces.
    pub async fn open(
        server: &str,
        transport: Box<dyn Transport>,
    ) -> Result<Self, TransportError> {
        let connection = Self {
            server: server.to_string(),
            transport,
            health: AtomicU8::new(Health::Unknown.as_u8()),
            created_at: Utc::now(),
        };
        match connection.handshake().await {
            Ok(()) => {
                connection.set_health(Health::Healthy);
                debug!(server, "tool server handshake complete");
                Ok(connection)
            }
            Err(err) => {
                connection.transport.close().await;
                Err(err)
            }
        }
    }

    async fn handshake(&self) -> Result<(), TransportError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {},
        });
        self.transport.request("initialize", params).await?;
        self.transport
            .notify("notifications/initialized", json!({}))
            .await
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn health(&self) -> Health {
        Health::from_u8(self.health.load(Ordering::SeqCst))
    }

    pub fn mark_unhealthy(&self) {
        self.set_health(Health::Unhealthy);
    }

    fn set_health(&self, health: Health) {
        self.health.store(health.as_u8(), Ordering::SeqCst);
    }

    /// Lightweight liveness probe.
    pub async fn ping(&self) -> Result<(), TransportError> {
        match self.transport.request("ping", json!({})).await {
            Ok(_) => {
                self.set_health(Health::Healthy);
                Ok(())
            }
            Err(err) => {
                self.mark_unhealthy();
                Err(err)
            }
        }
    }

    /// List every tool the server advertises, following list pagination.
    pub async fn list_tools(&self) -> Result<Vec<RawTool>, TransportError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = self.transport.request("tools/list", params).await?;
            if let Some(array) = result.get("tools").and_then(Value::as_array) {
                for tool in array {
                    let Some(name) = tool.get("name").and_then(Value::as_str) else {
                        continue;
                    };
                    tools.push(RawTool {
                        name: name.to_string(),
                        description: tool
                            .get("description")
                            .and_then(Value::as_str)
                            .map(|text| text.to_string()),
                        input_schema: tool.get("inputSchema").cloned(),
                    });
                }
            }
            let next = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(|value| value.to_string());
            match next {
                None => return Ok(tools),
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    warn!(
                        server = %self.server,
                        cursor = %next,
                        "tool listing cursor did not advance; stopping pagination"
                    );
                    return Ok(tools);
                }
                Some(next) => cursor = Some(next),
            }
        }
    }

    /// Invoke a tool by its server-side (unprefixed) name. Returns the raw
    /// call result; the invoker decides how to marshal it.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, TransportError> {
        let params = json!({
            "name": tool,
            "arguments": match arguments {
                Value::Null => Value::Object(Default::default()),
                other => other,
            },
        });
        self.transport.request("tools/call", params).await
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }
}
