//! The message protocol exchanged between agents.
//!
//! A `Message` is immutable once built: every field is private and only
//! readable through accessors. Replies are new values produced by
//! `Message::reply`, never edits of the request.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    agent::AgentId,
    error::{ConductorError, ConductorResult},
    policy::CommunicationLimits,
};

/// Business data carried by a message. The runtime never inspects it.
pub type Payload = Map<String, Value>;

/// Convert an arbitrary JSON value into a `Payload`.
///
/// Only JSON objects are accepted; anything else is `InvalidMessage`.
pub fn payload_from_json(value: Value) -> ConductorResult<Payload> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ConductorError::InvalidMessage {
            reason: format!("payload must be a JSON object, got {other}"),
        }),
    }
}

/// Globally unique message identifier, generated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub uuid::Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier shared by every message of one workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub uuid::Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Delivery urgency in `[1, 10]`. Higher drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Priority(u8);

impl Priority {
    pub const CRITICAL: Priority = Priority(10);
    pub const HIGH: Priority = Priority(8);
    pub const NORMAL: Priority = Priority(5);
    pub const LOW: Priority = Priority(3);

    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    /// Build a priority, rejecting values outside `[1, 10]`.
    pub fn new(value: i64) -> ConductorResult<Self> {
        if (i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(ConductorError::InvalidPriority { value })
        }
    }

    /// Resolve a named level (`"critical"`, `"high"`, ...) from the
    /// communication limits table.
    pub fn from_level(name: &str, limits: &CommunicationLimits) -> ConductorResult<Self> {
        let value = limits
            .priority_levels
            .get(name)
            .ok_or_else(|| ConductorError::ConfigError {
                reason: format!("unknown priority level '{name}'"),
            })?;
        Self::new(i64::from(*value))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl TryFrom<i64> for Priority {
    type Error = ConductorError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for i64 {
    fn from(priority: Priority) -> Self {
        i64::from(priority.0)
    }
}

/// An addressed unit of work or result exchanged between agents.
///
/// The serde representation is the wire shape:
/// `{id, source_agent, target_agent, message_type, payload, correlation_id,
/// timestamp, priority}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    source_agent: AgentId,
    target_agent: AgentId,
    message_type: String,
    payload: Payload,
    correlation_id: Option<CorrelationId>,
    timestamp: DateTime<Utc>,
    priority: Priority,
}

impl Message {
    /// Build a point-to-point message with a fresh id, the current time,
    /// normal priority and no correlation id.
    pub fn new(
        source_agent: impl Into<AgentId>,
        target_agent: impl Into<AgentId>,
        message_type: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            id: MessageId::new(),
            source_agent: source_agent.into(),
            target_agent: target_agent.into(),
            message_type: message_type.into(),
            payload,
            correlation_id: None,
            timestamp: Utc::now(),
            priority: Priority::default(),
        }
    }

    /// Attach a correlation id. Consumes the message, so this can only happen
    /// before the value is shared.
    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Set the delivery priority. Consumes the message.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Build a reply addressed back to this message's source, carrying the
    /// same correlation id and priority.
    pub fn reply(&self, message_type: impl Into<String>, payload: Payload) -> Message {
        Message {
            id: MessageId::new(),
            source_agent: self.target_agent.clone(),
            target_agent: self.source_agent.clone(),
            message_type: message_type.into(),
            payload,
            correlation_id: self.correlation_id,
            timestamp: Utc::now(),
            priority: self.priority,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn source_agent(&self) -> &AgentId {
        &self.source_agent
    }

    pub fn target_agent(&self) -> &AgentId {
        &self.target_agent
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consume the message and return its payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Size of the serialized JSON envelope in bytes.
    pub fn encoded_len(&self) -> ConductorResult<usize> {
        serde_json::to_vec(self)
            .map(|bytes| bytes.len())
            .map_err(|e| ConductorError::InvalidMessage {
                reason: format!("message {} cannot be serialized: {e}", self.id),
            })
    }

    /// True when more than `ttl_seconds` have passed since the message was
    /// created.
    pub fn is_expired(&self, ttl_seconds: u64, now: DateTime<Utc>) -> bool {
        let seconds = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
        match Duration::try_seconds(seconds) {
            Some(ttl) => now.signed_duration_since(self.timestamp) > ttl,
            None => false,
        }
    }
}
