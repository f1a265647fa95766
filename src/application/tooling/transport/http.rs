use super::{Transport, rpc_notification, rpc_request, unwrap_envelope};
use crate::application::tooling::error::TransportError;
use crate::config::EndpointConfig;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Streamable-HTTP transport: every JSON-RPC message is POSTed to the
/// server URL. The server may answer with a plain JSON body or with a short
/// `text/event-stream` body carrying the response as an SSE `data:` event.
/// A session id handed out on `initialize` is echoed on later requests.
pub struct HttpTransport {
    server: String,
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    session: Mutex<Option<String>>,
    id_counter: AtomicU64,
}

impl HttpTransport {
    pub fn connect(server: &str, config: &EndpointConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|source| TransportError::Http {
                server: server.to_string(),
                source,
            })?;
        Ok(Self {
            server: server.to_string(),
            client,
            url: config.url.clone(),
            headers: config.headers.clone(),
            session: Mutex::new(None),
            id_counter: AtomicU64::new(1),
        })
    }

    async fn post(&self, payload: &Value) -> Result<reqwest::Response, TransportError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(payload);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        let session = self.session.lock().expect("session lock").clone();
        if let Some(session_id) = session {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = request
            .send()
            .await
            .map_err(|source| TransportError::Http {
                server: self.server.clone(),
                source,
            })?;

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            let mut session = self.session.lock().expect("session lock");
            if session.as_deref() != Some(session_id) {
                debug!(server = %self.server, "tool server assigned a session id");
                *session = Some(session_id.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Transport {
                server: self.server.clone(),
                message: format!("unexpected HTTP status {status}"),
            });
        }
        Ok(response)
    }

    /// Pull the response envelope matching `id` out of an SSE-formatted
    /// body. Servers emit exactly one response event per request, but other
    /// events (progress notifications) may precede it.
    fn envelope_from_event_stream(&self, body: &str, id: &str) -> Result<Value, TransportError> {
        let mut last_event: Option<Value> = None;
        let mut data = String::new();
        for line in body.lines().chain(std::iter::once("")) {
            if let Some(rest) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.trim_start());
            } else if line.is_empty() && !data.is_empty() {
                if let Ok(value) = serde_json::from_str::<Value>(&data) {
                    let matches_id = value
                        .get("id")
                        .and_then(Value::as_str)
                        .is_some_and(|candidate| candidate == id);
                    if matches_id {
                        return Ok(value);
                    }
                    if value.get("id").is_some() {
                        last_event = Some(value);
                    }
                }
                data.clear();
            }
        }
        last_event.ok_or_else(|| TransportError::Transport {
            server: self.server.clone(),
            message: "event stream ended without a response".to_string(),
        })
    }

    /// DELETE releasing the server-assigned session, carrying the same
    /// configured headers as every other request.
    fn teardown_request(&self, session_id: String) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .delete(&self.url)
            .header(SESSION_HEADER, session_id);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        request
    }

    fn next_id(&self) -> String {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("req-{id}")
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id();
        let payload = rpc_request(&id, method, params);
        let response = self.post(&payload).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|source| TransportError::Http {
                server: self.server.clone(),
                source,
            })?;

        let envelope = if content_type.starts_with("text/event-stream") {
            self.envelope_from_event_stream(&body, &id)?
        } else {
            serde_json::from_str(&body).map_err(|source| TransportError::InvalidJson {
                server: self.server.clone(),
                source,
            })?
        };
        unwrap_envelope(&self.server, envelope)
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        self.post(&rpc_notification(method, params)).await?;
        Ok(())
    }

    async fn close(&self) {
        // Best-effort session teardown; servers without session support
        // simply reject the DELETE.
        let session = self.session.lock().expect("session lock").take();
        if let Some(session_id) = session {
            let _ = self.teardown_request(session_id).send().await;
        }
    }
}
