//! The orchestrator publishes every phase of a step on one structured
//! event channel. The presentation layer subscribes and is the only writer
//! of UI state; the only data flowing back is the approval response.

use crate::domain::types::Usage;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Deny,
}

/// What the presentation layer shows a human before a tool executes.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub call_id: String,
    pub server: String,
    pub tool: String,
    pub input: String,
}

pub enum AgentEvent {
    /// A step started and the model has not produced output yet.
    ThinkingStarted,
    /// First model output arrived (or the step ended); stop any spinner.
    ThinkingStopped,
    /// Streaming text delta from the model.
    StreamChunk(String),
    ToolCallStarted {
        id: String,
        name: String,
        input: String,
    },
    ToolCallFinished {
        id: String,
        name: String,
        output: String,
        is_error: bool,
    },
    /// Emitted synchronously with every enqueue/dequeue so the observed
    /// count is never stale.
    QueueChanged(usize),
    StepCompleted {
        response: String,
        usage: Usage,
    },
    /// The step was cancelled; an expected outcome, not an error.
    StepCancelled,
    StepFailed {
        message: String,
    },
    /// A tool call awaits a verdict; answer on the provided channel.
    ApprovalRequired {
        request: ApprovalRequest,
        respond: oneshot::Sender<ApprovalDecision>,
    },
}

pub type EventSender = mpsc::UnboundedSender<AgentEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<AgentEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
