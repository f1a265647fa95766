//! Shared fakes for exercising the pool, catalog and invoker without real
//! tool server processes.

use super::error::TransportError;
use super::pool::Connector;
use super::transport::Transport;
use crate::config::{ServerConfig, StdioConfig, TransportConfig};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) fn stdio_server(name: &str) -> ServerConfig {
    ServerConfig {
        name: name.to_string(),
        transport: TransportConfig::Stdio(StdioConfig {
            command: "unused".into(),
            args: Vec::new(),
            env: HashMap::new(),
            workdir: None,
        }),
        allowed_tools: Vec::new(),
        excluded_tools: Vec::new(),
    }
}

/// Scripted transport: answers the handshake and `ping`, serves a fixed
/// tool list, and delegates `tools/call` to a closure. Flipping `alive`
/// makes every subsequent request fail like a dead subprocess.
pub(crate) struct FakeTransport {
    pub server: String,
    pub tools: Vec<Value>,
    pub alive: Arc<AtomicBool>,
    pub calls: Arc<Mutex<Vec<(String, Value)>>>,
    pub on_call: CallHandler,
}

pub(crate) type CallHandler =
    Arc<dyn Fn(&str, &Value) -> Result<Value, TransportError> + Send + Sync>;

impl FakeTransport {
    pub fn new(server: &str, tools: Vec<Value>) -> Self {
        let name = server.to_string();
        Self {
            server: server.to_string(),
            tools,
            alive: Arc::new(AtomicBool::new(true)),
            calls: Arc::new(Mutex::new(Vec::new())),
            on_call: Arc::new(move |tool, _args| {
                Ok(json!({
                    "content": [{"type": "text", "text": format!("{name} ran {tool}")}],
                    "isError": false,
                }))
            }),
        }
    }

    pub fn with_call_handler(mut self, handler: CallHandler) -> Self {
        self.on_call = handler;
        self
    }

    pub fn with_alive_flag(mut self, alive: Arc<AtomicBool>) -> Self {
        self.alive = alive;
        self
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Terminated {
                server: self.server.clone(),
            });
        }
        self.calls
            .lock()
            .expect("call log lock")
            .push((method.to_string(), params.clone()));
        match method {
            "initialize" => Ok(json!({"protocolVersion": "2025-06-18", "capabilities": {}})),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.tools })),
            "tools/call" => {
                let tool = params
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
                (self.on_call)(tool, &arguments)
            }
            other => Err(TransportError::Rpc {
                server: self.server.clone(),
                code: -32601,
                message: format!("unsupported method '{other}'"),
            }),
        }
    }

    async fn notify(&self, _method: &str, _params: Value) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Terminated {
                server: self.server.clone(),
            });
        }
        Ok(())
    }

    async fn close(&self) {}
}

type TransportFactory =
    Arc<dyn Fn(&ServerConfig, usize) -> Result<Box<dyn Transport>, TransportError> + Send + Sync>;

/// Connector that builds fake transports and counts connection attempts
/// per server; the attempt index lets tests script "first connection dies,
/// second one works" sequences.
pub(crate) struct FakeConnector {
    factory: TransportFactory,
    attempts: Mutex<HashMap<String, usize>>,
}

impl FakeConnector {
    pub fn new(factory: TransportFactory) -> Self {
        Self {
            factory,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Every server serves the same fixed tool list.
    pub fn serving(tools: Vec<Value>) -> Self {
        Self::new(Arc::new(move |config, _attempt| {
            Ok(Box::new(FakeTransport::new(&config.name, tools.clone())))
        }))
    }

    pub fn attempts_for(&self, server: &str) -> usize {
        self.attempts
            .lock()
            .expect("attempts lock")
            .get(server)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, config: &ServerConfig) -> Result<Box<dyn Transport>, TransportError> {
        let attempt = {
            let mut attempts = self.attempts.lock().expect("attempts lock");
            let entry = attempts.entry(config.name.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        (self.factory)(config, attempt)
    }
}

pub(crate) fn text_tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": {"q": {"type": "string"}},
            "required": ["q"],
        },
    })
}
