//! Agent identity and lifecycle state types.
//!
//! These types say nothing about what an agent does; they only describe who it
//! is and where it sits in its lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for a registered agent instance.
///
/// Example: `AgentId("market_validation_001")`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&AgentId> for AgentId {
    fn from(value: &AgentId) -> Self {
        value.clone()
    }
}

/// Category key into the policy tables (e.g. `"product_architect"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentType(pub String);

impl AgentType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle state of an agent.
///
/// Legal transitions:
///
/// ```text
/// INITIALIZING ──► READY ◄──► PROCESSING ◄──► WAITING
///      │             │            │
///      └──► ERROR ◄──┴────────────┘
///             │
///             └──► INITIALIZING   (supervisor restart)
///
/// any non-terminated state ──► TERMINATED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Initializing,
    Ready,
    Processing,
    /// Entered only by handlers that block on an external event.
    Waiting,
    Error,
    Terminated,
}

impl AgentState {
    /// Return true if moving from `self` to `next` is an edge of the
    /// lifecycle graph.
    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::*;

        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Initializing, Ready) | (Initializing, Error) => true,
            (Ready, Processing) | (Ready, Error) => true,
            (Processing, Ready) | (Processing, Waiting) | (Processing, Error) => true,
            (Waiting, Processing) => true,
            (Error, Initializing) => true,
            _ => false,
        }
    }

    /// True for states in which the processing loop has halted.
    pub fn is_halted(self) -> bool {
        matches!(self, AgentState::Error | AgentState::Terminated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Initializing => "initializing",
            AgentState::Ready => "ready",
            AgentState::Processing => "processing",
            AgentState::Waiting => "waiting",
            AgentState::Error => "error",
            AgentState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
