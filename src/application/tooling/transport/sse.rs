use super::{Transport, response_key, rpc_notification, rpc_request, unwrap_envelope};
use crate::application::tooling::error::TransportError;
use crate::config::EndpointConfig;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use reqwest_eventsource::{Event, EventSource};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const ENDPOINT_WAIT: Duration = Duration::from_secs(30);

type Responder = oneshot::Sender<Result<Value, TransportError>>;

/// Server-push transport: a long-lived event stream delivers responses and
/// notifications; requests are POSTed to an endpoint the server announces
/// in its initial `endpoint` event.
pub struct SseTransport {
    inner: Arc<SseInner>,
    stream_task: JoinHandle<()>,
}

struct SseInner {
    server: String,
    client: reqwest::Client,
    endpoint: AsyncMutex<Option<Url>>,
    headers: HashMap<String, String>,
    pending: AsyncMutex<HashMap<String, Responder>>,
    id_counter: AtomicU64,
    closed: AtomicBool,
}

impl SseTransport {
    pub async fn connect(server: &str, config: &EndpointConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|source| http_error(server, source))?;
        let base = Url::parse(&config.url).map_err(|source| TransportError::Transport {
            server: server.to_string(),
            message: format!("invalid server URL '{}': {source}", config.url),
        })?;

        let mut request = client.get(base.clone());
        for (key, value) in &config.headers {
            request = request.header(key, value);
        }
        let stream = EventSource::new(request).map_err(|source| TransportError::Transport {
            server: server.to_string(),
            message: format!("failed to open event stream: {source}"),
        })?;

        let inner = Arc::new(SseInner {
            server: server.to_string(),
            client,
            endpoint: AsyncMutex::new(None),
            headers: config.headers.clone(),
            pending: AsyncMutex::new(HashMap::new()),
            id_counter: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = Arc::clone(&inner);
        let stream_task = tokio::spawn(async move {
            reader.stream_loop(stream, base, endpoint_tx).await;
        });

        let endpoint = tokio::time::timeout(ENDPOINT_WAIT, endpoint_rx)
            .await
            .map_err(|_| TransportError::Transport {
                server: server.to_string(),
                message: "timed out waiting for the server's endpoint event".to_string(),
            })?
            .map_err(|_| TransportError::Terminated {
                server: server.to_string(),
            })?;
        *inner.endpoint.lock().await = Some(endpoint);

        Ok(Self { inner, stream_task })
    }
}

#[async_trait]
impl Transport for SseTransport {
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

        if let Err(err) = inner.post(&rpc_request(&id, method, params)).await {
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
        self.inner.post(&rpc_notification(method, params)).await
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.stream_task.abort();
        self.inner.fail_all_pending().await;
    }
}

impl SseInner {
    async fn stream_loop(
        self: Arc<Self>,
        mut stream: EventSource,
        base: Url,
        endpoint_tx: oneshot::Sender<Url>,
    ) {
        let mut endpoint_tx = Some(endpoint_tx);
        while let Some(event) = stream.next().await {
            match event {
                Ok(Event::Open) => {
                    debug!(server = %self.server, "event stream opened");
                }
                Ok(Event::Message(message)) => match message.event.as_str() {
                    "endpoint" => match base.join(message.data.trim()) {
                        Ok(url) => {
                            if let Some(tx) = endpoint_tx.take() {
                                let _ = tx.send(url);
                            }
                        }
                        Err(source) => {
                            warn!(
                                server = %self.server,
                                data = message.data,
                                %source,
                                "server announced an unusable endpoint"
                            );
                        }
                    },
                    _ => match serde_json::from_str::<Value>(&message.data) {
                        Ok(value) => self.route_inbound(value).await,
                        Err(source) => {
                            warn!(
                                server = %self.server,
                                data = message.data,
                                %source,
                                "received invalid JSON on event stream"
                            );
                        }
                    },
                },
                Err(err) => {
                    if !self.closed.load(Ordering::SeqCst) {
                        warn!(server = %self.server, %err, "event stream failed");
                    }
                    stream.close();
                    break;
                }
            }
        }

        self.closed.store(true, Ordering::SeqCst);
        self.fail_all_pending().await;
    }

    async fn route_inbound(&self, value: Value) {
        let Some(id) = value.get("id").cloned() else {
            if let Some(method) = value.get("method").and_then(Value::as_str) {
                debug!(server = %self.server, method, "received notification from tool server");
            }
            return;
        };
        if value.get("method").is_some() {
            // Server-initiated requests are not supported on this transport.
            debug!(server = %self.server, "ignoring server-initiated request");
            return;
        }

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
                let _ = sender.send(Ok(value));
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

    async fn post(&self, payload: &Value) -> Result<(), TransportError> {
        let endpoint = self
            .endpoint
            .lock()
            .await
            .clone()
            .ok_or_else(|| TransportError::Transport {
                server: self.server.clone(),
                message: "no endpoint announced by server".to_string(),
            })?;

        let mut request = self.client.post(endpoint).json(payload);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        let response = request
            .send()
            .await
            .map_err(|source| http_error(&self.server, source))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Transport {
                server: self.server.clone(),
                message: format!("unexpected HTTP status {status}"),
            });
        }
        Ok(())
    }

    async fn fail_all_pending(&self) {
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

fn http_error(server: &str, source: reqwest::Error) -> TransportError {
    TransportError::Http {
        server: server.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inner() -> Arc<SseInner> {
        Arc::new(SseInner {
            server: "push".to_string(),
            client: reqwest::Client::new(),
            endpoint: AsyncMutex::new(None),
            headers: HashMap::new(),
            pending: AsyncMutex::new(HashMap::new()),
            id_counter: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn stream_messages_resolve_pending_requests() {
        let inner = inner();
        let (tx, rx) = oneshot::channel();
        inner.pending.lock().await.insert("req-1".to_string(), tx);

        inner
            .route_inbound(json!({"jsonrpc": "2.0", "id": "req-1", "result": {"ok": true}}))
            .await;

        let envelope = rx.await.expect("responder fired").expect("result envelope");
        assert_eq!(envelope["result"]["ok"], Value::Bool(true));
    }

    #[tokio::test]
    async fn a_dead_stream_fails_every_pending_request() {
        let inner = inner();
        let (tx, rx) = oneshot::channel();
        inner.pending.lock().await.insert("req-1".to_string(), tx);

        // What stream_loop does when the event stream ends or errors.
        inner.closed.store(true, Ordering::SeqCst);
        inner.fail_all_pending().await;

        let err = rx.await.expect("responder fired").expect_err("terminated");
        assert!(matches!(err, TransportError::Terminated { .. }));
        assert!(inner.pending.lock().await.is_empty());
    }
}
