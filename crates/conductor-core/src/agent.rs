//! The agent runtime: lifecycle state machine, private mailbox, handler
//! dispatch table and processing loop.
//!
//! ```text
//! start():  initialize() → READY → loop {
//!     wait on mailbox (poll interval)
//!     READY → PROCESSING → handler → PROCESSING → READY
//!     reply? → broker
//! }
//! ```
//!
//! A handler error moves the agent to `ERROR` and ends the loop (fail-stop).
//! Restarting is the supervisor's job, not the agent's.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    future::Future,
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use conductor_contracts::{
    agent::{AgentId, AgentState, AgentType},
    capability::{CapabilityDescriptor, CapabilitySet},
    error::{ConductorError, ConductorResult},
    message::{Message, MessageId},
};

use crate::{
    mailbox::Mailbox,
    metrics::Metrics,
    traits::{AgentSetup, Broker, Handler, Inbox, PayloadValidator},
};

/// How long the loop waits on an empty mailbox before polling again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

const TRANSITION_HISTORY: usize = 64;
const SEEN_MESSAGE_CAPACITY: usize = 1024;

// ── AgentContext ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct ContextState {
    values: HashMap<String, Value>,
    seen_order: VecDeque<MessageId>,
    seen: HashSet<MessageId>,
}

/// Scratch space private to one agent instance.
///
/// Cloning yields another handle to the same space; it is handed only to the
/// owning agent's handlers and setup.
#[derive(Clone, Default)]
pub struct AgentContext {
    inner: Arc<Mutex<ContextState>>,
}

impl AgentContext {
    fn lock(&self) -> std::sync::MutexGuard<'_, ContextState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().values.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.lock().values.insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().values.remove(key)
    }

    /// Record `id` as processed and return true the first time it is seen.
    ///
    /// Handlers use this to make side effects idempotent under redelivery.
    /// Only the most recent 1024 ids are remembered.
    pub fn first_delivery(&self, id: MessageId) -> bool {
        let mut state = self.lock();
        if !state.seen.insert(id) {
            return false;
        }
        state.seen_order.push_back(id);
        if state.seen_order.len() > SEEN_MESSAGE_CAPACITY {
            if let Some(oldest) = state.seen_order.pop_front() {
                state.seen.remove(&oldest);
            }
        }
        true
    }
}

// ── Closure handlers ─────────────────────────────────────────────────────────

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Message, AgentContext) -> Fut + Send + Sync,
    Fut: Future<Output = ConductorResult<Option<Message>>> + Send,
{
    async fn handle(&self, message: Message, context: &AgentContext) -> ConductorResult<Option<Message>> {
        (self.0)(message, context.clone()).await
    }
}

/// Wrap an async closure as a `Handler`.
///
/// ```rust,ignore
/// agent.register_handler("workflow_task", handler_fn(|msg, _ctx| async move {
///     Ok(Some(msg.reply("workflow_result", msg.payload().clone())))
/// }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Message, AgentContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ConductorResult<Option<Message>>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

// ── Agent ────────────────────────────────────────────────────────────────────

/// A long-lived unit with a lifecycle, a private priority mailbox, published
/// capabilities and a message-type → handler dispatch table.
///
/// Build with `Agent::new` and the `with_*` methods, wrap in an `Arc`,
/// register handlers, then run `start()` on a task.
pub struct Agent {
    agent_id: AgentId,
    agent_type: AgentType,
    state: watch::Sender<AgentState>,
    transitions: Mutex<VecDeque<(AgentState, AgentState)>>,
    capabilities: RwLock<CapabilitySet>,
    /// Capability count before setup first ran; setup output beyond it is
    /// replaced on every re-initialization.
    setup_mark: Mutex<Option<usize>>,
    mailbox: Mailbox,
    context: AgentContext,
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
    setup: Option<Arc<dyn AgentSetup>>,
    validator: Option<Arc<dyn PayloadValidator>>,
    metrics: Option<Arc<Metrics>>,
    poll_interval: Duration,
    /// Serializes dispatch between the loop and direct invocations.
    processing: tokio::sync::Mutex<()>,
}

impl Agent {
    /// Create an agent in `INITIALIZING`.
    pub fn new(agent_id: impl Into<AgentId>, agent_type: impl Into<AgentType>) -> Self {
        let (state, _) = watch::channel(AgentState::Initializing);
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            state,
            transitions: Mutex::new(VecDeque::new()),
            capabilities: RwLock::new(CapabilitySet::default()),
            setup_mark: Mutex::new(None),
            mailbox: Mailbox::new(),
            context: AgentContext::default(),
            handlers: RwLock::new(HashMap::new()),
            setup: None,
            validator: None,
            metrics: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            processing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_setup(mut self, setup: Arc<dyn AgentSetup>) -> Self {
        self.setup = Some(setup);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn PayloadValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn agent_type(&self) -> &AgentType {
        &self.agent_type
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    // ── State ────────────────────────────────────────────────────────────────

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Observe state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    /// The most recent transitions, oldest first.
    pub fn recent_transitions(&self) -> Vec<(AgentState, AgentState)> {
        self.transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Move to `next`, rejecting edges outside the lifecycle graph.
    fn transition(&self, next: AgentState) -> ConductorResult<()> {
        self.transition_where(next, |current| current.can_transition_to(next))
            .and_then(|moved| {
                if moved {
                    Ok(())
                } else {
                    Err(ConductorError::IllegalTransition {
                        agent_id: self.agent_id.0.clone(),
                        from: self.state().to_string(),
                        to: next.to_string(),
                    })
                }
            })
    }

    /// Move from `expected` to `next` only if the agent is still in
    /// `expected`. Returns whether the move happened.
    fn transition_from(&self, expected: AgentState, next: AgentState) -> bool {
        self.transition_where(next, |current| current == expected && current.can_transition_to(next))
            .unwrap_or(false)
    }

    fn transition_where(
        &self,
        next: AgentState,
        allowed: impl Fn(AgentState) -> bool,
    ) -> ConductorResult<bool> {
        let mut from = None;
        self.state.send_if_modified(|current| {
            if allowed(*current) {
                from = Some(*current);
                *current = next;
                true
            } else {
                false
            }
        });

        if let Some(from) = from {
            info!(
                agent_id = %self.agent_id,
                from = %from,
                to = %next,
                "agent state changed"
            );
            let mut history = self.transitions.lock().unwrap_or_else(PoisonError::into_inner);
            history.push_back((from, next));
            if history.len() > TRANSITION_HISTORY {
                history.pop_front();
            }
        }
        Ok(from.is_some())
    }

    /// Enter `ERROR` from whatever non-terminal state the agent is in.
    pub(crate) fn enter_error(&self) {
        self.transition_where(AgentState::Error, |current| {
            current.can_transition_to(AgentState::Error)
        })
        .ok();
    }

    /// `PROCESSING → WAITING`, for handlers that must block on an external
    /// event before returning.
    pub fn mark_waiting(&self) -> ConductorResult<()> {
        if self.transition_from(AgentState::Processing, AgentState::Waiting) {
            Ok(())
        } else {
            Err(self.illegal(AgentState::Waiting))
        }
    }

    /// `WAITING → PROCESSING`.
    pub fn mark_resumed(&self) -> ConductorResult<()> {
        if self.transition_from(AgentState::Waiting, AgentState::Processing) {
            Ok(())
        } else {
            Err(self.illegal(AgentState::Processing))
        }
    }

    fn illegal(&self, to: AgentState) -> ConductorError {
        ConductorError::IllegalTransition {
            agent_id: self.agent_id.0.clone(),
            from: self.state().to_string(),
            to: to.to_string(),
        }
    }

    /// `ERROR → INITIALIZING`, used by the supervisor before a restart.
    pub(crate) fn reset_for_restart(&self) -> ConductorResult<()> {
        if self.transition_from(AgentState::Error, AgentState::Initializing) {
            Ok(())
        } else {
            Err(self.illegal(AgentState::Initializing))
        }
    }

    // ── Registration ─────────────────────────────────────────────────────────

    /// Bind `handler` to `message_type`. Re-registering a type replaces the
    /// previous handler.
    pub fn register_handler(&self, message_type: impl Into<String>, handler: Arc<dyn Handler>) {
        let message_type = message_type.into();
        debug!(agent_id = %self.agent_id, message_type = %message_type, "handler registered");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(message_type, handler);
    }

    /// Append a capability to the published list.
    pub fn add_capability(&self, descriptor: CapabilityDescriptor) {
        self.capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(descriptor);
    }

    /// Drop what an earlier setup run published so a restart does not
    /// publish it twice.
    fn forget_setup_capabilities(&self) {
        let mut mark = self.setup_mark.lock().unwrap_or_else(PoisonError::into_inner);
        let mut capabilities = self.capabilities.write().unwrap_or_else(PoisonError::into_inner);
        match *mark {
            Some(len) => capabilities.truncate(len),
            None => *mark = Some(capabilities.len()),
        }
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn capability(&self, name: &str) -> Option<CapabilityDescriptor> {
        self.capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .find(name)
            .cloned()
    }

    fn handler(&self, message_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(message_type)
            .cloned()
    }

    // ── Mailbox ──────────────────────────────────────────────────────────────

    /// Enqueue a message on this agent's mailbox. The only sanctioned way to
    /// deliver work to an agent.
    pub fn receive_message(&self, message: Message) {
        debug!(
            agent_id = %self.agent_id,
            message_id = %message.id(),
            priority = message.priority().value(),
            "message queued"
        );
        self.mailbox.push(message);
    }

    /// Nudge an idle loop so it re-checks its state.
    pub(crate) fn wake(&self) {
        self.mailbox.wake();
    }

    /// Number of messages waiting in the mailbox.
    pub fn mailbox_len(&self) -> usize {
        self.mailbox.len()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Run one-time setup. On failure the agent moves to `ERROR` and never
    /// becomes `READY`.
    pub async fn initialize(&self) -> ConductorResult<()> {
        let state = self.state();
        if state != AgentState::Initializing {
            return Err(ConductorError::InitializationFailed {
                agent_id: self.agent_id.0.clone(),
                reason: format!("initialize() called in state {state}"),
            });
        }

        let started = Instant::now();
        if let Some(setup) = &self.setup {
            self.forget_setup_capabilities();
            if let Err(e) = setup.initialize(self).await {
                self.enter_error();
                let err = match e {
                    ConductorError::InitializationFailed { .. } => e,
                    other => ConductorError::InitializationFailed {
                        agent_id: self.agent_id.0.clone(),
                        reason: other.to_string(),
                    },
                };
                error!(agent_id = %self.agent_id, error = %err, "agent initialization failed");
                return Err(err);
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_startup(&self.agent_id, started.elapsed());
        }
        debug!(
            agent_id = %self.agent_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "agent initialized"
        );
        Ok(())
    }

    /// Run the processing loop until `ERROR` or `TERMINATED`.
    ///
    /// Returns `Ok(())` after `shutdown()`, or the dispatch error that halted
    /// the loop. Replies produced by handlers are submitted to `broker`.
    pub async fn start(self: Arc<Self>, broker: Arc<dyn Broker>) -> ConductorResult<()> {
        self.initialize().await?;
        self.transition(AgentState::Ready)?;
        info!(
            agent_id = %self.agent_id,
            agent_type = %self.agent_type,
            "agent started"
        );

        loop {
            match self.state() {
                AgentState::Terminated => {
                    info!(agent_id = %self.agent_id, "agent loop stopped");
                    return Ok(());
                }
                // Halted by a direct dispatch while idle.
                AgentState::Error => {
                    return Err(ConductorError::AgentUnavailable {
                        agent_id: self.agent_id.0.clone(),
                        state: AgentState::Error.to_string(),
                    })
                }
                _ => {}
            }

            let Some(message) = self.mailbox.recv_timeout(self.poll_interval).await else {
                continue;
            };

            if self.state() == AgentState::Terminated {
                // Leave it for whoever inherits the mailbox contents.
                self.mailbox.push(message);
                info!(agent_id = %self.agent_id, "agent loop stopped");
                return Ok(());
            }

            // The handler runs on its own task so a panic is observed as a lost
            // worker rather than tearing down the loop's task.
            let worker = {
                let agent = Arc::clone(&self);
                let message = message.clone();
                tokio::spawn(async move { agent.process_message(message).await })
            };

            match worker.await {
                Ok(Ok(Some(reply))) => self.forward(&broker, reply).await,
                Ok(Ok(None)) => {}
                Ok(Err(ConductorError::SchemaValidation { reason })) => {
                    warn!(
                        agent_id = %self.agent_id,
                        message_id = %message.id(),
                        reason = %reason,
                        "message rejected by input schema"
                    );
                }
                Ok(Err(e @ ConductorError::AgentUnavailable { .. })) => {
                    // Never dispatched, so it stays queued.
                    self.mailbox.push(message);
                    if self.state() == AgentState::Terminated {
                        return Ok(());
                    }
                    return Err(e);
                }
                Ok(Err(e)) => {
                    error!(
                        agent_id = %self.agent_id,
                        message_id = %message.id(),
                        error = %e,
                        "dispatch failed, agent halted"
                    );
                    return Err(e);
                }
                Err(join_error) => {
                    // At-least-once: the message goes back on the queue.
                    let message_id = message.id();
                    self.mailbox.push(message);
                    self.enter_error();
                    error!(
                        agent_id = %self.agent_id,
                        message_id = %message_id,
                        error = %join_error,
                        "worker lost mid-processing, message re-queued"
                    );
                    return Err(ConductorError::WorkerLost {
                        agent_id: self.agent_id.0.clone(),
                        message_id: message_id.to_string(),
                    });
                }
            }
        }
    }

    async fn forward(&self, broker: &Arc<dyn Broker>, reply: Message) {
        let reply_id = reply.id();
        if let Err(e) = broker.send(reply).await {
            // A lost reply is a delivery problem, not a handler failure.
            error!(
                agent_id = %self.agent_id,
                message_id = %reply_id,
                error = %e,
                "failed to submit reply to broker"
            );
        }
    }

    /// Dispatch one message to its handler and return the handler's reply.
    ///
    /// This is the processing step used by the loop and by direct
    /// (synchronous) invocation. A started agent moves
    /// `READY → PROCESSING → READY`; an agent that was never started runs the
    /// handler without leaving `INITIALIZING`. Messages with no registered
    /// handler are logged and answered with `None`.
    ///
    /// # Errors
    ///
    /// - `AgentUnavailable` when the agent is in `ERROR` or `TERMINATED`
    /// - `SchemaValidation` when the payload fails the input schema (no state
    ///   change)
    /// - `HandlerFailed` when the handler errors or its reply fails the output
    ///   schema; the agent is left in `ERROR`
    pub async fn process_message(&self, message: Message) -> ConductorResult<Option<Message>> {
        let _serial = self.processing.lock().await;

        let entry_state = self.state();
        if !matches!(entry_state, AgentState::Ready | AgentState::Initializing) {
            return Err(ConductorError::AgentUnavailable {
                agent_id: self.agent_id.0.clone(),
                state: entry_state.to_string(),
            });
        }

        let message_id = message.id();
        let message_type = message.message_type().to_string();
        let capability = self.capability(&message_type);

        if let (Some(validator), Some(capability)) = (&self.validator, &capability) {
            let report = validator.validate(message.payload(), &capability.input_schema)?;
            if !report.passed {
                return Err(ConductorError::SchemaValidation {
                    reason: format!("input for '{}': {}", capability.name, report.summary()),
                });
            }
        }

        let tracked = entry_state == AgentState::Ready;
        if tracked {
            self.transition(AgentState::Processing)?;
        }
        let mut cancel_guard = CancelGuard {
            agent: self,
            message_id,
            armed: tracked,
        };

        let started = Instant::now();
        let outcome = match self.handler(&message_type) {
            Some(handler) => handler.handle(message, &self.context).await,
            None => {
                warn!(
                    agent_id = %self.agent_id,
                    message_type = %message_type,
                    message_id = %message_id,
                    "no handler for message type"
                );
                Ok(None)
            }
        };
        let outcome = outcome.and_then(|reply| self.check_output(reply, capability.as_ref()));
        let elapsed = started.elapsed();
        cancel_guard.armed = false;

        match outcome {
            Ok(reply) => {
                if tracked {
                    self.transition_from(AgentState::Processing, AgentState::Ready);
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_success(&self.agent_id, elapsed);
                }
                debug!(
                    agent_id = %self.agent_id,
                    message_id = %message_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    replied = reply.is_some(),
                    "message processed"
                );
                Ok(reply)
            }
            Err(e) => {
                self.enter_error();
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure(&self.agent_id, elapsed);
                }
                let err = match e {
                    ConductorError::HandlerFailed { .. } => e,
                    other => ConductorError::HandlerFailed {
                        agent_id: self.agent_id.0.clone(),
                        message_id: message_id.to_string(),
                        message_type: message_type.clone(),
                        reason: other.to_string(),
                    },
                };
                error!(agent_id = %self.agent_id, error = %err, "handler failed");
                Err(err)
            }
        }
    }

    fn check_output(
        &self,
        reply: Option<Message>,
        capability: Option<&CapabilityDescriptor>,
    ) -> ConductorResult<Option<Message>> {
        if let (Some(validator), Some(capability), Some(reply)) = (&self.validator, capability, &reply) {
            let report = validator.validate(reply.payload(), &capability.output_schema)?;
            if !report.passed {
                return Err(ConductorError::SchemaValidation {
                    reason: format!("output for '{}': {}", capability.name, report.summary()),
                });
            }
        }
        Ok(reply)
    }

    /// Move to `TERMINATED` and wake the loop so it exits. Idempotent.
    pub fn shutdown(&self) {
        let moved = self
            .transition_where(AgentState::Terminated, |current| current != AgentState::Terminated)
            .unwrap_or(false);
        if moved {
            info!(agent_id = %self.agent_id, "agent shut down");
        }
        self.mailbox.wake();
    }
}

/// Moves the agent to `ERROR` if a dispatch future is dropped mid-handler,
/// e.g. by a step deadline, so it is never left stuck in `PROCESSING`.
struct CancelGuard<'a> {
    agent: &'a Agent,
    message_id: MessageId,
    armed: bool,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                agent_id = %self.agent.agent_id,
                message_id = %self.message_id,
                "dispatch cancelled mid-processing"
            );
            self.agent.enter_error();
        }
    }
}

impl Inbox for Agent {
    fn deliver(&self, message: Message) -> ConductorResult<()> {
        self.receive_message(message);
        Ok(())
    }
}
