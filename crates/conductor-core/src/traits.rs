//! Core trait definitions for the conductor runtime.
//!
//! These traits are the seams between the runtime and everything pluggable:
//!
//! - `Handler`         : business logic for one message type (opaque)
//! - `AgentSetup`      : one-time resource acquisition for an agent
//! - `Broker`          : delivery of messages to agents by identifier
//! - `Inbox`           : a routable recipient (an agent mailbox or a reply slot)
//! - `Dispatcher`      : how the orchestrator invokes a workflow step
//! - `EventLog`        : append-only record of workflow responses
//! - `PolicySource`    : the static policy tables
//! - `PayloadValidator`: schema checks on payloads before and after dispatch

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use conductor_contracts::{
    error::ConductorResult,
    message::{CorrelationId, Message, Payload},
    policy::{AgentPolicy, CommunicationLimits, FeatureFlags, MonitoringConfig, SlaTargets, WorkflowDefinition},
    verify::ValidationReport,
};

use crate::agent::{Agent, AgentContext};

/// Business logic bound to one `message_type` on one agent.
///
/// Handlers may be invoked more than once for the same message (at-least-once
/// delivery). Side effects should be keyed on `message.id()`; see
/// `AgentContext::first_delivery`.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process `message` and optionally produce a reply.
    ///
    /// Returning `Err` is a dispatch failure: the agent enters `ERROR` and its
    /// loop halts.
    async fn handle(&self, message: Message, context: &AgentContext) -> ConductorResult<Option<Message>>;
}

/// One-time setup run by `Agent::initialize()` before the agent becomes
/// `READY`. Typically acquires connections and publishes capabilities.
#[async_trait]
pub trait AgentSetup: Send + Sync {
    async fn initialize(&self, agent: &Agent) -> ConductorResult<()>;
}

/// The delivery layer between agents.
///
/// `send` is fire-and-forget: `Ok(())` means the broker accepted the message,
/// not that the target processed it.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn send(&self, message: Message) -> ConductorResult<()>;
}

/// A recipient the broker can route to.
pub trait Inbox: Send + Sync {
    fn deliver(&self, message: Message) -> ConductorResult<()>;
}

/// How the orchestrator hands one workflow step to an agent and obtains its
/// response.
///
/// Both the in-process direct-call backend and the queued backend share this
/// signature, so workflow execution does not depend on the delivery model.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, agent: &Arc<Agent>, message: Message) -> ConductorResult<Option<Message>>;
}

/// The append-only record of every response produced during workflow
/// execution, used for audit and replay.
pub trait EventLog: Send + Sync {
    /// Append one response. Entries are never modified; only
    /// `enforce_retention` removes them.
    fn append(&self, message: &Message) -> ConductorResult<()>;

    /// All retained entries in append order.
    fn entries(&self) -> Vec<Message>;

    fn len(&self) -> usize {
        self.entries().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries belonging to one workflow execution, in append order.
    fn by_correlation(&self, correlation_id: CorrelationId) -> Vec<Message> {
        self.entries()
            .into_iter()
            .filter(|m| m.correlation_id() == Some(correlation_id))
            .collect()
    }

    /// Drop entries older than the log's retention window and return how
    /// many went. Logs without a window keep everything.
    fn enforce_retention(&self) -> usize {
        0
    }
}

/// Read access to the static policy tables.
///
/// Implementations are loaded once at process start and never change while
/// the runtime is running.
pub trait PolicySource: Send + Sync {
    fn agent_policy(&self, agent_type: &str) -> Option<&AgentPolicy>;

    fn workflow(&self, workflow_id: &str) -> Option<&WorkflowDefinition>;

    /// Every catalog workflow as `(workflow_id, definition)`.
    fn workflows(&self) -> Vec<(String, WorkflowDefinition)>;

    fn limits(&self) -> &CommunicationLimits;

    fn sla(&self) -> &SlaTargets;

    fn monitoring(&self) -> &MonitoringConfig;

    fn features(&self) -> &FeatureFlags;
}

/// Structural validation of payloads against capability schemas.
pub trait PayloadValidator: Send + Sync {
    /// Validate `payload` against the JSON Schema `schema`.
    ///
    /// A `Value::Null` schema means "unconstrained" and must pass.
    fn validate(&self, payload: &Payload, schema: &Value) -> ConductorResult<ValidationReport>;
}
