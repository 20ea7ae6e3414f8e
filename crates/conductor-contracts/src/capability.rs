//! Self-describing capability metadata.
//!
//! Each agent publishes one `CapabilityDescriptor` per operation it can
//! perform. The schemas document the payload shape and are used by a
//! `PayloadValidator` when one is attached to the agent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata for one operation an agent can perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Operation name. A capability named like a message type is the one
    /// used to validate that message's payload.
    pub name: String,
    pub description: String,
    /// JSON Schema for the request payload. `Value::Null` means unconstrained.
    #[serde(default)]
    pub input_schema: Value,
    /// JSON Schema for the response payload. `Value::Null` means unconstrained.
    #[serde(default)]
    pub output_schema: Value,
}

impl CapabilityDescriptor {
    /// Describe a capability with no schema constraints.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: Value::Null,
            output_schema: Value::Null,
        }
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }
}

/// The ordered list of capabilities an agent publishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySet {
    inner: Vec<CapabilityDescriptor>,
}

impl CapabilitySet {
    /// Append a descriptor. Order of registration is preserved.
    pub fn add(&mut self, descriptor: CapabilityDescriptor) {
        self.inner.push(descriptor);
    }

    /// Keep the first `len` descriptors.
    pub fn truncate(&mut self, len: usize) {
        self.inner.truncate(len);
    }

    /// Find the most recently added descriptor with this name.
    pub fn find(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.inner.iter().rev().find(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.iter().map(|c| c.name.clone()).collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &CapabilityDescriptor> {
        self.inner.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
