use super::approval::{ApprovalMode, StepHooks};
use super::engine::{StepEngine, StepError};
use super::events::{AgentEvent, EventSender};
use crate::domain::types::ChatMessage;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RunOnceError {
    #[error("a step is already running")]
    Busy,
    #[error("the agent is shutting down")]
    Closed,
    #[error(transparent)]
    Step(#[from] StepError),
}

#[derive(Default)]
struct RunState {
    busy: bool,
    closed: bool,
    queue: VecDeque<String>,
    active: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<RunState>,
    history: Mutex<Vec<ChatMessage>>,
    system_prompt: Option<String>,
    engine: Arc<dyn StepEngine>,
    events: EventSender,
    approval: ApprovalMode,
    root: CancellationToken,
}

impl Shared {
    fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event);
    }

    fn seed_history(system_prompt: &Option<String>) -> Vec<ChatMessage> {
        match system_prompt {
            Some(prompt) => vec![ChatMessage::system(prompt)],
            None => Vec::new(),
        }
    }
}

/// Single-flight front door for the agent. At most one generation step
/// runs at a time; prompts submitted while busy queue up in FIFO order
/// and drain automatically as steps finish.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn StepEngine>,
        events: EventSender,
        approval: ApprovalMode,
        system_prompt: Option<String>,
    ) -> Self {
        let history = Shared::seed_history(&system_prompt);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RunState::default()),
                history: Mutex::new(history),
                system_prompt,
                engine,
                events,
                approval,
                root: CancellationToken::new(),
            }),
        }
    }

    /// Submit a prompt. Runs immediately when idle, otherwise joins the
    /// queue. A closed orchestrator drops the prompt silently.
    pub fn run(&self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        let mut state = self.shared.state.lock().expect("run state");
        if state.closed {
            return;
        }
        if state.busy {
            state.queue.push_back(prompt);
            let depth = state.queue.len();
            drop(state);
            self.shared.emit(AgentEvent::QueueChanged(depth));
            return;
        }
        state.busy = true;
        let token = self.shared.root.child_token();
        state.active = Some(token.clone());
        let shared = Arc::clone(&self.shared);
        state.worker = Some(tokio::spawn(worker(shared, prompt, token)));
    }

    /// Run a single prompt to completion and return the final response.
    /// Fails fast instead of queueing when a step is already in flight.
    pub async fn run_once(&self, prompt: impl Into<String>) -> Result<String, RunOnceError> {
        let prompt = prompt.into();
        let token = {
            let mut state = self.shared.state.lock().expect("run state");
            if state.closed {
                return Err(RunOnceError::Closed);
            }
            if state.busy {
                return Err(RunOnceError::Busy);
            }
            state.busy = true;
            let token = self.shared.root.child_token();
            state.active = Some(token.clone());
            token
        };

        self.shared.emit(AgentEvent::ThinkingStarted);
        let mut messages = self.shared.history.lock().expect("history").clone();
        messages.push(ChatMessage::user(&prompt));
        let hooks = StepHooks::new(
            self.shared.events.clone(),
            token,
            self.shared.approval.clone(),
        );
        let result = self.shared.engine.generate_step(messages, hooks.clone()).await;
        {
            let mut state = self.shared.state.lock().expect("run state");
            state.busy = false;
            state.active = None;
        }
        match result {
            Ok(outcome) => {
                *self.shared.history.lock().expect("history") = outcome.messages;
                self.shared.emit(AgentEvent::StepCompleted {
                    response: outcome.response.clone(),
                    usage: outcome.usage,
                });
                Ok(outcome.response)
            }
            Err(err) => {
                hooks.stop_thinking();
                Err(err.into())
            }
        }
    }

    /// Cancel whatever step is in flight. No-op when idle; queued prompts
    /// stay queued and the next one starts as usual.
    pub fn cancel_current_step(&self) {
        let state = self.shared.state.lock().expect("run state");
        if let Some(active) = &state.active {
            info!("cancelling active step");
            active.cancel();
        }
    }

    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().expect("run state").queue.len()
    }

    /// Drop all queued prompts. The in-flight step keeps running.
    pub fn clear_queue(&self) {
        let mut state = self.shared.state.lock().expect("run state");
        state.queue.clear();
        drop(state);
        self.shared.emit(AgentEvent::QueueChanged(0));
    }

    /// Reset the conversation to just the system prompt.
    pub fn clear_messages(&self) {
        let mut history = self.shared.history.lock().expect("history");
        *history = Shared::seed_history(&self.shared.system_prompt);
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.shared.history.lock().expect("history").clone()
    }

    /// Replace the conversation wholesale, e.g. when restoring a session.
    pub fn replace_history(&self, messages: Vec<ChatMessage>) {
        *self.shared.history.lock().expect("history") = messages;
    }

    /// Cancel any in-flight step, drop the queue, and wait for the worker
    /// to exit. Idempotent; later `run` calls are no-ops.
    pub async fn close(&self) {
        let handle = {
            let mut state = self.shared.state.lock().expect("run state");
            state.closed = true;
            state.queue.clear();
            if let Some(active) = &state.active {
                active.cancel();
            }
            state.worker.take()
        };
        self.shared.root.cancel();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn worker(shared: Arc<Shared>, first: String, first_token: CancellationToken) {
    let mut prompt = first;
    let mut token = first_token;
    loop {
        shared.emit(AgentEvent::ThinkingStarted);
        run_step(&shared, &prompt, token.clone()).await;

        let mut state = shared.state.lock().expect("run state");
        if state.closed {
            state.queue.clear();
            state.busy = false;
            state.active = None;
            return;
        }
        match state.queue.pop_front() {
            Some(next) => {
                let depth = state.queue.len();
                prompt = next;
                token = shared.root.child_token();
                state.active = Some(token.clone());
                drop(state);
                shared.emit(AgentEvent::QueueChanged(depth));
            }
            None => {
                state.busy = false;
                state.active = None;
                return;
            }
        }
    }
}

async fn run_step(shared: &Arc<Shared>, prompt: &str, token: CancellationToken) {
    let mut messages = shared.history.lock().expect("history").clone();
    messages.push(ChatMessage::user(prompt));
    let hooks = StepHooks::new(shared.events.clone(), token, shared.approval.clone());

    match shared.engine.generate_step(messages, hooks.clone()).await {
        Ok(outcome) => {
            *shared.history.lock().expect("history") = outcome.messages;
            shared.emit(AgentEvent::StepCompleted {
                response: outcome.response,
                usage: outcome.usage,
            });
        }
        Err(StepError::Cancelled) => {
            hooks.stop_thinking();
            info!("step cancelled");
            shared.emit(AgentEvent::StepCancelled);
        }
        Err(err) => {
            hooks.stop_thinking();
            warn!(error = %err, "step failed");
            shared.emit(AgentEvent::StepFailed {
                message: err.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::agent::engine::StepOutcome;
    use crate::application::agent::events::event_channel;
    use crate::domain::types::Usage;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};

    type StepReply = oneshot::Sender<Result<StepOutcome, StepError>>;

    /// Engine that reports each step to the test and blocks until the
    /// test replies, so step lifetimes are fully under test control.
    struct GatedEngine {
        starts: mpsc::UnboundedSender<(String, StepReply)>,
    }

    impl GatedEngine {
        fn new() -> (Self, mpsc::UnboundedReceiver<(String, StepReply)>) {
            let (starts, rx) = mpsc::unbounded_channel();
            (Self { starts }, rx)
        }
    }

    #[async_trait]
    impl StepEngine for GatedEngine {
        async fn generate_step(
            &self,
            messages: Vec<ChatMessage>,
            hooks: StepHooks,
        ) -> Result<StepOutcome, StepError> {
            let prompt = messages.last().expect("user message").content.clone();
            let (reply, wait) = oneshot::channel();
            self.starts.send((prompt, reply)).expect("test listening");
            tokio::select! {
                _ = hooks.token().cancelled() => Err(StepError::Cancelled),
                result = wait => result.expect("test replies"),
            }
        }
    }

    fn answer(messages: Vec<ChatMessage>, prompt: &str) -> Result<StepOutcome, StepError> {
        let response = format!("{prompt}!");
        let mut messages = messages;
        messages.push(ChatMessage::assistant(&response));
        Ok(StepOutcome {
            messages,
            response,
            usage: Usage::default(),
        })
    }

    fn answered(prompt: &str) -> Result<StepOutcome, StepError> {
        answer(vec![ChatMessage::user(prompt)], prompt)
    }

    async fn next_completion(rx: &mut super::super::events::EventReceiver) -> String {
        loop {
            match rx.recv().await.expect("event stream open") {
                AgentEvent::StepCompleted { response, .. } => return response,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn prompts_queue_fifo_while_busy() {
        let (engine, mut starts) = GatedEngine::new();
        let (events, mut rx) = event_channel();
        let agent = Orchestrator::new(Arc::new(engine), events, ApprovalMode::auto(true), None);

        agent.run("one");
        let (prompt, reply) = starts.recv().await.expect("first step starts");
        assert_eq!(prompt, "one");

        // Busy now, so these stack up instead of running.
        agent.run("two");
        agent.run("three");
        assert_eq!(agent.queue_len(), 2);

        reply.send(answered("one")).expect("engine waiting");
        let (prompt, reply) = starts.recv().await.expect("second step starts");
        assert_eq!(prompt, "two");
        assert_eq!(agent.queue_len(), 1);
        reply.send(answered("two")).expect("engine waiting");

        let (prompt, reply) = starts.recv().await.expect("third step starts");
        assert_eq!(prompt, "three");
        reply.send(answered("three")).expect("engine waiting");

        assert_eq!(next_completion(&mut rx).await, "one!");
        assert_eq!(next_completion(&mut rx).await, "two!");
        assert_eq!(next_completion(&mut rx).await, "three!");
        assert_eq!(agent.queue_len(), 0);
    }

    #[tokio::test]
    async fn queue_changes_are_announced() {
        let (engine, mut starts) = GatedEngine::new();
        let (events, mut rx) = event_channel();
        let agent = Orchestrator::new(Arc::new(engine), events, ApprovalMode::auto(true), None);

        agent.run("one");
        let (_, reply) = starts.recv().await.expect("first step starts");
        agent.run("two");
        reply.send(answered("one")).expect("engine waiting");
        let (_, reply) = starts.recv().await.expect("second step starts");
        reply.send(answered("two")).expect("engine waiting");

        let mut depths = Vec::new();
        loop {
            match rx.recv().await.expect("event stream open") {
                AgentEvent::QueueChanged(depth) => depths.push(depth),
                AgentEvent::StepCompleted { response, .. } if response == "two!" => break,
                _ => continue,
            }
        }
        // One announcement for the enqueue, one for the dequeue.
        assert_eq!(depths, vec![1, 0]);
    }

    #[tokio::test]
    async fn clear_queue_drops_pending_prompts() {
        let (engine, mut starts) = GatedEngine::new();
        let (events, mut rx) = event_channel();
        let agent = Orchestrator::new(Arc::new(engine), events, ApprovalMode::auto(true), None);

        agent.run("one");
        let (_, reply) = starts.recv().await.expect("first step starts");
        agent.run("two");
        agent.run("three");
        agent.clear_queue();
        assert_eq!(agent.queue_len(), 0);

        reply.send(answered("one")).expect("engine waiting");
        assert_eq!(next_completion(&mut rx).await, "one!");

        // Nothing else should start.
        let outcome =
            tokio::time::timeout(Duration::from_millis(50), starts.recv()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn cancel_interrupts_the_active_step_only() {
        let (engine, mut starts) = GatedEngine::new();
        let (events, mut rx) = event_channel();
        let agent = Orchestrator::new(Arc::new(engine), events, ApprovalMode::auto(true), None);

        // Idle cancel is a no-op.
        agent.cancel_current_step();

        agent.run("one");
        let (_, _reply) = starts.recv().await.expect("first step starts");
        agent.run("two");
        agent.cancel_current_step();

        // The queued prompt still runs after the cancellation.
        let (prompt, reply) = starts.recv().await.expect("second step starts");
        assert_eq!(prompt, "two");
        reply.send(answered("two")).expect("engine waiting");

        let mut saw_cancelled = false;
        loop {
            match rx.recv().await.expect("event stream open") {
                AgentEvent::StepCancelled => saw_cancelled = true,
                AgentEvent::StepCompleted { response, .. } => {
                    assert_eq!(response, "two!");
                    break;
                }
                _ => continue,
            }
        }
        assert!(saw_cancelled);
    }

    #[tokio::test]
    async fn failed_step_leaves_history_untouched() {
        let (engine, mut starts) = GatedEngine::new();
        let (events, mut rx) = event_channel();
        let agent = Orchestrator::new(
            Arc::new(engine),
            events,
            ApprovalMode::auto(true),
            Some("be brief".to_string()),
        );

        agent.run("boom");
        let (_, reply) = starts.recv().await.expect("step starts");
        reply
            .send(Err(StepError::ToolBudgetExhausted { limit: 1 }))
            .expect("engine waiting");

        loop {
            match rx.recv().await.expect("event stream open") {
                AgentEvent::StepFailed { message } => {
                    assert!(message.contains("tool rounds"));
                    break;
                }
                _ => continue,
            }
        }
        // Still just the system prompt: the failed turn was not recorded.
        let history = agent.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "be brief");
    }

    #[tokio::test]
    async fn close_stops_the_worker_and_ignores_later_prompts() {
        let (engine, mut starts) = GatedEngine::new();
        let (events, _rx) = event_channel();
        let agent = Orchestrator::new(Arc::new(engine), events, ApprovalMode::auto(true), None);

        agent.run("one");
        let (_, _reply) = starts.recv().await.expect("step starts");
        agent.run("queued");
        agent.close().await;

        agent.run("ignored");
        let outcome =
            tokio::time::timeout(Duration::from_millis(50), starts.recv()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn run_once_returns_the_response_and_updates_history() {
        let (engine, mut starts) = GatedEngine::new();
        let (events, _rx) = event_channel();
        let agent = Orchestrator::new(Arc::new(engine), events, ApprovalMode::auto(true), None);

        let driver = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.run_once("ping").await })
        };
        let (prompt, reply) = starts.recv().await.expect("step starts");
        assert_eq!(prompt, "ping");
        reply.send(answered("ping")).expect("engine waiting");

        let response = driver.await.expect("driver").expect("run_once succeeds");
        assert_eq!(response, "ping!");
        assert_eq!(agent.history().len(), 2);
    }

    #[tokio::test]
    async fn run_once_refuses_while_busy() {
        let (engine, mut starts) = GatedEngine::new();
        let (events, _rx) = event_channel();
        let agent = Orchestrator::new(Arc::new(engine), events, ApprovalMode::auto(true), None);

        agent.run("one");
        let (_, _reply) = starts.recv().await.expect("step starts");

        let err = agent.run_once("two").await.expect_err("busy");
        assert!(matches!(err, RunOnceError::Busy));
    }

    #[tokio::test]
    async fn clear_messages_keeps_the_system_prompt() {
        let (engine, _starts) = GatedEngine::new();
        let (events, _rx) = event_channel();
        let agent = Orchestrator::new(
            Arc::new(engine),
            events,
            ApprovalMode::auto(true),
            Some("stay sharp".to_string()),
        );

        agent.replace_history(vec![
            ChatMessage::system("stay sharp"),
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi"),
        ]);
        agent.clear_messages();
        let history = agent.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "stay sharp");
    }
}
