//! Runtime error types for the conductor agent runtime.
//!
//! All fallible operations return `ConductorResult<T>`. Variants carry the
//! identifiers (agent, message, workflow) needed to log a failure with enough
//! context to trace it back to a single delivery or execution.

use thiserror::Error;

/// The unified error type for the conductor runtime.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConductorError {
    /// An agent's one-time setup failed; the agent never reached `READY`.
    #[error("agent '{agent_id}' failed to initialize: {reason}")]
    InitializationFailed { agent_id: String, reason: String },

    /// A message handler returned an error while the agent was processing.
    #[error("handler for '{message_type}' in agent '{agent_id}' failed on message {message_id}: {reason}")]
    HandlerFailed {
        agent_id: String,
        message_id: String,
        message_type: String,
        reason: String,
    },

    /// The task running a handler was lost mid-processing. The message was
    /// re-queued for redelivery.
    #[error("worker for agent '{agent_id}' was lost while processing message {message_id}")]
    WorkerLost { agent_id: String, message_id: String },

    /// The agent cannot accept work in its current lifecycle state.
    #[error("agent '{agent_id}' is unavailable in state {state}")]
    AgentUnavailable { agent_id: String, state: String },

    /// A lifecycle transition outside the legal state graph was attempted.
    #[error("agent '{agent_id}' cannot transition from {from} to {to}")]
    IllegalTransition {
        agent_id: String,
        from: String,
        to: String,
    },

    /// `execute_workflow` was called with an id that was never defined.
    #[error("unknown workflow: {workflow_id}")]
    UnknownWorkflow { workflow_id: String },

    /// A workflow step names an agent that is not registered.
    #[error("unknown agent in workflow: {agent_id}")]
    UnknownAgent { agent_id: String },

    /// The broker has no route for the message's target.
    #[error("message {message_id} has no route to target '{target_agent}'")]
    UnroutableMessage {
        message_id: String,
        target_agent: String,
    },

    /// The broker accepted the message but could not hand it on.
    #[error("delivery of message {message_id} failed: {reason}")]
    DeliveryFailed { message_id: String, reason: String },

    /// The serialized envelope exceeds the configured maximum size.
    #[error("message {message_id} is {size} bytes, above the {limit} byte limit")]
    MessageTooLarge {
        message_id: String,
        size: usize,
        limit: usize,
    },

    /// The message outlived its time-to-live before it could be routed.
    #[error("message {message_id} expired after {ttl_seconds}s")]
    MessageExpired { message_id: String, ttl_seconds: u64 },

    /// A priority outside `[1, 10]` was supplied.
    #[error("priority {value} is outside the range 1..=10")]
    InvalidPriority { value: i64 },

    /// A message or payload does not have the required shape.
    #[error("invalid message: {reason}")]
    InvalidMessage { reason: String },

    /// A payload failed validation against a capability schema.
    #[error("schema validation error: {reason}")]
    SchemaValidation { reason: String },

    /// A step, workflow or reply wait exceeded its deadline.
    #[error("{scope} exceeded its deadline of {timeout_ms}ms")]
    DeadlineExceeded { scope: String, timeout_ms: u64 },

    /// The supervisor gave up on an agent after too many restarts.
    #[error("agent '{agent_id}' exceeded the restart limit of {max_restarts}")]
    RestartLimitExceeded { agent_id: String, max_restarts: u32 },

    /// The feature flag gating the multi-agent subsystem is off.
    #[error("multi-agent subsystem is disabled by feature flag '{flag}'")]
    SubsystemDisabled { flag: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },
}

impl ConductorError {
    /// True for failures a retry with backoff may cure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConductorError::DeliveryFailed { .. } | ConductorError::DeadlineExceeded { .. }
        )
    }
}

/// Convenience alias used throughout the conductor crates.
pub type ConductorResult<T> = Result<T, ConductorError>;
