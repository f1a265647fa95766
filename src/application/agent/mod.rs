pub mod approval;
pub mod engine;
pub mod events;
pub mod orchestrator;

pub use approval::{ApprovalMode, ApprovalPolicy, ApproveAll, DenyAll, StepHooks};
pub use engine::{StepEngine, StepError, StepOutcome, ToolLoopEngine};
pub use events::{
    AgentEvent, ApprovalDecision, ApprovalRequest, EventReceiver, EventSender, event_channel,
};
pub use orchestrator::{Orchestrator, RunOnceError};
