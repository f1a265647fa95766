use super::{Transport, response_key, rpc_notification, rpc_request, unwrap_envelope};
use crate::application::tooling::error::TransportError;
use crate::config::StdioConfig;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::{debug, warn};

type Responder = oneshot::Sender<Result<Value, TransportError>>;

/// Line-delimited JSON-RPC over a subprocess's stdin/stdout. A background
/// reader task routes responses to pending callers; when the process exits
/// every pending request fails with `Terminated`.
pub struct StdioTransport {
    inner: Arc<StdioInner>,
}

struct StdioInner {
    server: String,
    child: AsyncMutex<Option<Child>>,
    writer: AsyncMutex<Option<BufWriter<ChildStdin>>>,
    pending: AsyncMutex<HashMap<String, Responder>>,
    id_counter: AtomicU64,
    closed: AtomicBool,
}

impl StdioTransport {
    /// Spawn the configured subprocess and start the reader task. The MCP
    /// handshake is the connection layer's job, not the transport's.
    pub async fn connect(server: &str, config: &StdioConfig) -> Result<Self, TransportError> {
        let mut command = Command::new(&config.command);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &config.workdir {
            command.current_dir(dir);
        }
        if !config.args.is_empty() {
            command.args(&config.args);
        }
        for (key, value) in &config.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| TransportError::Spawn {
            server: server.to_string(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| transport_error(server, "failed to capture server stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| transport_error(server, "failed to capture server stdout"))?;

        let inner = Arc::new(StdioInner {
            server: server.to_string(),
            child: AsyncMutex::new(Some(child)),
            writer: AsyncMutex::new(Some(BufWriter::new(stdin))),
            pending: AsyncMutex::new(HashMap::new()),
            id_counter: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        let reader = Arc::clone(&inner);
        tokio::spawn(async move {
            reader.reader_loop(stdout).await;
        });

        Ok(Self { inner })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Terminated {
                server: inner.server.clone(),
            });
        }

        let id = inner.next_id();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = inner.pending.lock().await;
            pending.insert(id.clone(), tx);
        }

        let payload = rpc_request(&id, method, params);
        if let Err(err) = inner.write_message(&payload).await {
            inner.pending.lock().await.remove(&id);
            return Err(err);
        }

        match rx.await {
            Ok(Ok(envelope)) => unwrap_envelope(&inner.server, envelope),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(TransportError::Terminated {
                server: inner.server.clone(),
            }),
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        self.inner
            .write_message(&rpc_notification(method, params))
            .await
    }

    async fn close(&self) {
        self.inner.shutdown().await;
    }
}

impl StdioInner {
    async fn reader_loop(self: Arc<Self>, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(item) = lines.next_line().await {
            match item {
                Some(raw) => {
                    let trimmed = raw.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if trimmed.starts_with('\u{1b}') {
                        debug!(
                            server = %self.server,
                            line = trimmed,
                            "skipping non-JSON ANSI log line from tool server"
                        );
                        continue;
                    }
                    match serde_json::from_str::<Value>(&raw) {
                        Ok(value) => self.route_inbound(value).await,
                        Err(source) => {
                            warn!(
                                server = %self.server,
                                line = raw,
                                %source,
                                "received invalid JSON from tool server"
                            );
                        }
                    }
                }
                None => break,
            }
        }

        self.shutdown().await;
    }

    async fn route_inbound(&self, value: Value) {
        if let Some(id) = value.get("id").cloned() {
            if value.get("method").is_some() {
                self.handle_server_request(id, value).await;
            } else {
                self.resolve_pending(id, value).await;
            }
        } else if let Some(method) = value.get("method").and_then(Value::as_str) {
            debug!(server = %self.server, method, "received notification from tool server");
        }
    }

    async fn resolve_pending(&self, id: Value, envelope: Value) {
        let key = match response_key(&id) {
            Some(key) => key,
            None => return,
        };

        let responder = {
            let mut pending = self.pending.lock().await;
            pending.remove(&key)
        };

        match responder {
            Some(sender) => {
                let _ = sender.send(Ok(envelope));
            }
            None => {
                debug!(
                    server = %self.server,
                    response_id = key,
                    "received response for unknown request"
                );
            }
        }
    }

    async fn handle_server_request(&self, id: Value, value: Value) {
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let payload = match method {
            "ping" => {
                let mut envelope = json!({"jsonrpc": "2.0", "result": {}});
                envelope["id"] = id;
                envelope
            }
            other => {
                warn!(server = %self.server, method = other, "server sent unsupported request");
                let mut envelope = json!({
                    "jsonrpc": "2.0",
                    "error": {
                        "code": -32601,
                        "message": format!("client does not implement method '{other}'"),
                    },
                });
                envelope["id"] = id;
                envelope
            }
        };
        if let Err(err) = self.write_message(&payload).await {
            warn!(server = %self.server, %err, "failed to answer server request");
        }
    }

    async fn write_message(&self, message: &Value) -> Result<(), TransportError> {
        let encoded =
            serde_json::to_string(message).map_err(|source| TransportError::InvalidJson {
                server: self.server.clone(),
                source,
            })?;

        let mut writer = self.writer.lock().await;
        let stream = writer
            .as_mut()
            .ok_or_else(|| transport_error(&self.server, "writer not initialised"))?;
        stream
            .write_all(encoded.as_bytes())
            .await
            .map_err(|source| transport_error(&self.server, source.to_string()))?;
        stream
            .write_all(b"\n")
            .await
            .map_err(|source| transport_error(&self.server, source.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|source| transport_error(&self.server, source.to_string()))
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut writer = self.writer.lock().await;
            *writer = None;
        }

        {
            let mut child = self.child.lock().await;
            if let Some(mut running) = child.take() {
                if let Err(err) = running.kill().await {
                    debug!(
                        server = %self.server,
                        %err,
                        "failed to kill tool server process (may have already exited)"
                    );
                }
                let _ = running.wait().await;
            }
        }

        let mut pending = self.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(TransportError::Terminated {
                server: self.server.clone(),
            }));
        }
    }

    fn next_id(&self) -> String {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("req-{id}")
    }
}

fn transport_error(server: &str, message: impl Into<String>) -> TransportError {
    TransportError::Transport {
        server: server.to_string(),
        message: message.into(),
    }
}
