use super::events::{AgentEvent, ApprovalDecision, ApprovalRequest, EventSender};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Decides tool calls without a human in the loop.
#[async_trait]
pub trait ApprovalPolicy: Send + Sync {
    async fn review(&self, request: &ApprovalRequest) -> ApprovalDecision;
}

/// Default policy for non-interactive runs.
pub struct ApproveAll;

#[async_trait]
impl ApprovalPolicy for ApproveAll {
    async fn review(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::Approve
    }
}

pub struct DenyAll;

#[async_trait]
impl ApprovalPolicy for DenyAll {
    async fn review(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::Deny
    }
}

/// How the orchestrator settles the approval handshake: block on the
/// presentation layer's response, or consult a policy.
#[derive(Clone)]
pub enum ApprovalMode {
    Interactive,
    Policy(Arc<dyn ApprovalPolicy>),
}

impl ApprovalMode {
    pub fn auto(approve: bool) -> Self {
        if approve {
            ApprovalMode::Policy(Arc::new(ApproveAll))
        } else {
            ApprovalMode::Policy(Arc::new(DenyAll))
        }
    }
}

/// Handles a step engine needs to report progress and clear tool calls:
/// the event channel, the step's cancellation token, and the approval
/// mode. Cloned freely into background work.
#[derive(Clone)]
pub struct StepHooks {
    events: EventSender,
    token: CancellationToken,
    approval: ApprovalMode,
    thinking_stopped: Arc<AtomicBool>,
}

impl StepHooks {
    pub fn new(events: EventSender, token: CancellationToken, approval: ApprovalMode) -> Self {
        Self {
            events,
            token,
            approval,
            thinking_stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Fire-and-forget publish; a departed subscriber is not an error.
    pub fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event);
    }

    /// Forward a streaming delta, stopping the thinking indicator on the
    /// first one.
    pub fn chunk(&self, text: String) {
        self.stop_thinking();
        self.emit(AgentEvent::StreamChunk(text));
    }

    /// Emits `ThinkingStopped` exactly once per step.
    pub fn stop_thinking(&self) {
        if !self.thinking_stopped.swap(true, Ordering::SeqCst) {
            self.emit(AgentEvent::ThinkingStopped);
        }
    }

    /// The approval handshake. Interactive mode publishes an
    /// `ApprovalRequired` event and blocks until the presentation layer
    /// answers or the step is cancelled, whichever comes first; a dropped
    /// response channel counts as a denial. Policy mode never blocks on a
    /// human.
    pub async fn approve(&self, request: ApprovalRequest) -> Result<ApprovalDecision, Interrupted> {
        match &self.approval {
            ApprovalMode::Policy(policy) => Ok(policy.review(&request).await),
            ApprovalMode::Interactive => {
                let (respond, response) = oneshot::channel();
                self.emit(AgentEvent::ApprovalRequired { request, respond });
                tokio::select! {
                    _ = self.token.cancelled() => Err(Interrupted),
                    decision = response => {
                        let decision = decision.unwrap_or_else(|_| {
                            debug!("approval channel dropped; denying tool call");
                            ApprovalDecision::Deny
                        });
                        Ok(decision)
                    }
                }
            }
        }
    }
}

/// The step was cancelled while a wait was pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::agent::events::event_channel;
    use std::time::Duration;

    fn request() -> ApprovalRequest {
        ApprovalRequest {
            call_id: "call-1".to_string(),
            server: "files".to_string(),
            tool: "delete".to_string(),
            input: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn policy_mode_never_blocks() {
        let (events, _rx) = event_channel();
        let hooks = StepHooks::new(events, CancellationToken::new(), ApprovalMode::auto(true));
        let decision = hooks.approve(request()).await.expect("not interrupted");
        assert_eq!(decision, ApprovalDecision::Approve);
    }

    #[tokio::test]
    async fn interactive_mode_waits_for_the_response_channel() {
        let (events, mut rx) = event_channel();
        let hooks = StepHooks::new(events, CancellationToken::new(), ApprovalMode::Interactive);

        let waiter = tokio::spawn(async move { hooks.approve(request()).await });

        let event = rx.recv().await.expect("approval event");
        let AgentEvent::ApprovalRequired { respond, .. } = event else {
            panic!("expected approval event");
        };
        respond.send(ApprovalDecision::Deny).expect("responder alive");

        let decision = waiter.await.expect("join").expect("not interrupted");
        assert_eq!(decision, ApprovalDecision::Deny);
    }

    #[tokio::test]
    async fn cancellation_unblocks_a_pending_approval() {
        let (events, mut rx) = event_channel();
        let token = CancellationToken::new();
        let hooks = StepHooks::new(events, token.clone(), ApprovalMode::Interactive);

        let waiter = tokio::spawn(async move { hooks.approve(request()).await });

        // Hold the response channel open but never answer.
        let event = rx.recv().await.expect("approval event");
        let AgentEvent::ApprovalRequired { respond, .. } = event else {
            panic!("expected approval event");
        };

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("returns promptly")
            .expect("join");
        assert_eq!(result, Err(Interrupted));
        drop(respond);
    }

    #[tokio::test]
    async fn dropped_response_channel_denies() {
        let (events, mut rx) = event_channel();
        let hooks = StepHooks::new(events, CancellationToken::new(), ApprovalMode::Interactive);

        let waiter = tokio::spawn(async move { hooks.approve(request()).await });

        let event = rx.recv().await.expect("approval event");
        let AgentEvent::ApprovalRequired { respond, .. } = event else {
            panic!("expected approval event");
        };
        drop(respond);

        let decision = waiter.await.expect("join").expect("not interrupted");
        assert_eq!(decision, ApprovalDecision::Deny);
    }

    #[tokio::test]
    async fn thinking_stops_only_once() {
        let (events, mut rx) = event_channel();
        let hooks = StepHooks::new(events, CancellationToken::new(), ApprovalMode::auto(true));

        hooks.chunk("a".to_string());
        hooks.chunk("b".to_string());
        hooks.stop_thinking();

        assert!(matches!(rx.recv().await, Some(AgentEvent::ThinkingStopped)));
        assert!(matches!(rx.recv().await, Some(AgentEvent::StreamChunk(chunk)) if chunk == "a"));
        assert!(matches!(rx.recv().await, Some(AgentEvent::StreamChunk(chunk)) if chunk == "b"));
        assert!(rx.try_recv().is_err());
    }
}
