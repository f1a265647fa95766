//! OpenAI-compatible chat client. Covers OpenAI-style endpoints and local
//! runtimes (Ollama, vLLM, llama.cpp) that speak the same wire format.

use super::traits::ModelProvider;
use super::types::{ModelError, ModelRequest, ModelResponse};
use crate::config::ProviderConfig;
use crate::domain::types::{ChatMessage, MessageRole, ToolCallRequest, Usage};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

pub struct OpenAiCompatClient {
    id: String,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Creates client from provider config; the API key is read from the
    /// configured environment variable.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ModelError> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| ModelError::MissingApiKey {
                provider: config.id.clone(),
            })?),
            None => None,
        };
        Ok(Self::new(&config.id, &config.endpoint, api_key))
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    fn build_payload(&self, request: &ModelRequest) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": to_wire_messages(&request.messages),
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|descriptor| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": descriptor.name,
                            "description": descriptor.description,
                            "parameters": descriptor.input_schema(),
                        },
                    })
                })
                .collect();
            payload["tools"] = Value::Array(tools);
        }
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        payload
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let payload = self.build_payload(&request);
        info!(
            provider = self.id.as_str(),
            model = request.model.as_str(),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending chat request"
        );

        let mut http = self.client.post(self.chat_url()).json(&payload);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response = http
            .send()
            .await
            .map_err(|source| ModelError::network(&self.id, source))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| ModelError::network(&self.id, source))?;
        if !status.is_success() {
            return Err(ModelError::invalid_response(
                &self.id,
                format!("HTTP {status}: {}", truncate(&body, 300)),
            ));
        }

        let completion: Value = serde_json::from_str(&body)
            .map_err(|source| ModelError::invalid_response(&self.id, source.to_string()))?;
        debug!(provider = self.id.as_str(), "Received chat completion");
        parse_completion(&self.id, completion)
    }
}

/// Maps domain messages onto the OpenAI chat wire shape, including the
/// tool-call linkage in both directions.
fn to_wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| match message.role {
            MessageRole::Tool => json!({
                "role": "tool",
                "tool_call_id": message.tool_call_id,
                "content": message.content,
            }),
            MessageRole::Assistant if !message.tool_calls.is_empty() => {
                let calls: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {"name": call.name, "arguments": call.arguments},
                        })
                    })
                    .collect();
                json!({
                    "role": "assistant",
                    "content": message.content,
                    "tool_calls": calls,
                })
            }
            role => json!({"role": role.as_str(), "content": message.content}),
        })
        .collect()
}

fn parse_completion(provider: &str, completion: Value) -> Result<ModelResponse, ModelError> {
    let parsed: WireCompletion = serde_json::from_value(completion)
        .map_err(|source| ModelError::invalid_response(provider, source.to_string()))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::invalid_response(provider, "no choices in completion"))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCallRequest {
            id: call.id,
            name: call.function.name,
            arguments: call.function.arguments,
        })
        .collect::<Vec<_>>();

    let content = choice.message.content.unwrap_or_default();
    let message = if tool_calls.is_empty() {
        ChatMessage::assistant(content)
    } else {
        ChatMessage::assistant_calls(content, tool_calls)
    };

    let usage = parsed
        .usage
        .map(|usage| Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
        .unwrap_or_default();

    Ok(ModelResponse { message, usage })
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[derive(Deserialize)]
struct WireCompletion {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
