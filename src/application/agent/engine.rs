use super::approval::StepHooks;
use super::events::{AgentEvent, ApprovalDecision, ApprovalRequest};
use crate::application::tooling::{InvokeError, ToolCall, ToolInvoker};
use crate::domain::types::{ChatMessage, Usage};
use crate::infrastructure::model::{ModelError, ModelRequest, ResolvedModel, caps_for};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

const DENIED_OUTPUT: &str = "tool call denied by user";

/// One completed generation step: the full resulting message list (the
/// step owns truncation decisions), the final response text, and usage.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub messages: Vec<ChatMessage>,
    pub response: String,
    pub usage: Usage,
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("step cancelled")]
    Cancelled,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Tool(#[from] InvokeError),
    #[error("step exceeded the {limit} allowed tool rounds")]
    ToolBudgetExhausted { limit: usize },
}

/// The model+tools abstraction the orchestrator drives. One call is one
/// full generation turn, including any tool calls it triggers.
#[async_trait]
pub trait StepEngine: Send + Sync {
    async fn generate_step(
        &self,
        messages: Vec<ChatMessage>,
        hooks: StepHooks,
    ) -> Result<StepOutcome, StepError>;
}

/// Drives a chat loop between one model and the tool invoker: send the
/// conversation plus tool descriptors, execute whatever calls come back
/// (approval first), feed results in, and repeat until the model answers
/// in plain text or the round budget runs out.
pub struct ToolLoopEngine {
    resolved: ResolvedModel,
    invoker: Arc<ToolInvoker>,
    max_tool_steps: usize,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl ToolLoopEngine {
    pub fn new(resolved: ResolvedModel, invoker: Arc<ToolInvoker>, max_tool_steps: usize) -> Self {
        Self {
            resolved,
            invoker,
            max_tool_steps,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_sampling(mut self, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn build_request(&self, messages: Vec<ChatMessage>) -> ModelRequest {
        // Capability lookup is advisory; unknown models pass through.
        let caps = caps_for(&self.resolved.model);
        ModelRequest {
            model: self.resolved.model.clone(),
            messages,
            tools: self.invoker.descriptors().to_vec(),
            temperature: if caps.supports_temperature {
                self.temperature
            } else {
                None
            },
            max_tokens: self.max_tokens.or(caps.max_tokens),
        }
    }

    async fn run_tool_call(
        &self,
        call: &crate::domain::types::ToolCallRequest,
        hooks: &StepHooks,
        messages: &mut Vec<ChatMessage>,
    ) -> Result<(), StepError> {
        hooks.emit(AgentEvent::ToolCallStarted {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.arguments.clone(),
        });

        let (server, tool) = match self.invoker.catalog().resolve(&call.name) {
            Some(mapping) => (mapping.server.clone(), mapping.tool.clone()),
            None => (String::new(), call.name.clone()),
        };
        let decision = hooks
            .approve(ApprovalRequest {
                call_id: call.id.clone(),
                server,
                tool,
                input: call.arguments.clone(),
            })
            .await
            .map_err(|_| StepError::Cancelled)?;

        if decision == ApprovalDecision::Deny {
            debug!(tool = %call.name, "tool call denied");
            hooks.emit(AgentEvent::ToolCallFinished {
                id: call.id.clone(),
                name: call.name.clone(),
                output: DENIED_OUTPUT.to_string(),
                is_error: true,
            });
            messages.push(ChatMessage::tool_result(&call.id, DENIED_OUTPUT));
            return Ok(());
        }

        let invocation = ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.arguments.clone(),
        };
        let output = tokio::select! {
            _ = hooks.token().cancelled() => return Err(StepError::Cancelled),
            output = self.invoker.invoke(&invocation) => output?,
        };

        hooks.emit(AgentEvent::ToolCallFinished {
            id: call.id.clone(),
            name: call.name.clone(),
            output: output.content.clone(),
            is_error: output.is_error,
        });
        messages.push(ChatMessage::tool_result(&call.id, output.content));
        Ok(())
    }
}

#[async_trait]
impl StepEngine for ToolLoopEngine {
    async fn generate_step(
        &self,
        messages: Vec<ChatMessage>,
        hooks: StepHooks,
    ) -> Result<StepOutcome, StepError> {
        let mut messages = messages;
        let mut usage = Usage::default();
        let mut rounds = 0usize;

        loop {
            let request = self.build_request(messages.clone());

            let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
            let chunk_hooks = hooks.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(chunk) = chunk_rx.recv().await {
                    chunk_hooks.chunk(chunk);
                }
            });

            let response = tokio::select! {
                _ = hooks.token().cancelled() => return Err(StepError::Cancelled),
                response = self.resolved.provider.chat_stream(request, chunk_tx) => response?,
            };
            // The provider dropped its sender, so the forwarder drains and
            // exits; awaiting keeps chunk events ordered before what follows.
            let _ = forwarder.await;

            usage.add(response.usage);
            let message = response.message;
            messages.push(message.clone());

            if message.tool_calls.is_empty() {
                hooks.stop_thinking();
                info!(rounds, "generation step complete");
                return Ok(StepOutcome {
                    messages,
                    response: message.content,
                    usage,
                });
            }

            if rounds >= self.max_tool_steps {
                return Err(StepError::ToolBudgetExhausted {
                    limit: self.max_tool_steps,
                });
            }
            rounds += 1;
            hooks.stop_thinking();

            for call in &message.tool_calls {
                self.run_tool_call(call, &hooks, &mut messages).await?;
            }
        }
    }
}
