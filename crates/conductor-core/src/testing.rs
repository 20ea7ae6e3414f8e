//! Hand-written trait doubles shared by the unit tests.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::Value;

use conductor_contracts::{
    error::ConductorResult,
    message::{Message, Payload},
    policy::{AgentPolicy, CommunicationLimits, FeatureFlags, MonitoringConfig, SlaTargets, WorkflowDefinition},
    verify::{ValidationFailure, ValidationReport},
};

use crate::traits::{Broker, EventLog, Inbox, PayloadValidator, PolicySource};

/// Accepts everything and remembers it.
#[derive(Default)]
pub struct RecordingBroker {
    sent: Arc<Mutex<Vec<Message>>>,
}

impl RecordingBroker {
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn send(&self, message: Message) -> ConductorResult<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingInbox {
    received: Arc<Mutex<Vec<Message>>>,
}

impl RecordingInbox {
    pub fn received(&self) -> Vec<Message> {
        self.received.lock().unwrap().clone()
    }
}

impl Inbox for RecordingInbox {
    fn deliver(&self, message: Message) -> ConductorResult<()> {
        self.received.lock().unwrap().push(message);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryEventLog {
    entries: Arc<Mutex<Vec<Message>>>,
}

impl EventLog for MemoryEventLog {
    fn append(&self, message: &Message) -> ConductorResult<()> {
        self.entries.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn entries(&self) -> Vec<Message> {
        self.entries.lock().unwrap().clone()
    }
}

/// Understands only the `required` keyword of a schema.
pub struct RequiredFieldValidator;

impl PayloadValidator for RequiredFieldValidator {
    fn validate(&self, payload: &Payload, schema: &Value) -> ConductorResult<ValidationReport> {
        let failures = schema
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .filter(|field| !payload.contains_key(*field))
            .map(|field| ValidationFailure {
                path: String::new(),
                message: format!("missing required field '{field}'"),
            })
            .collect();
        Ok(ValidationReport::from_failures(failures))
    }
}

/// Policy tables built in code. Feature flags default to a disabled subsystem.
#[derive(Default)]
pub struct StaticPolicies {
    pub agents: HashMap<String, AgentPolicy>,
    pub workflows: BTreeMap<String, WorkflowDefinition>,
    pub limits: CommunicationLimits,
    pub sla: SlaTargets,
    pub monitoring: MonitoringConfig,
    pub features: FeatureFlags,
}

impl PolicySource for StaticPolicies {
    fn agent_policy(&self, agent_type: &str) -> Option<&AgentPolicy> {
        self.agents.get(agent_type)
    }

    fn workflow(&self, workflow_id: &str) -> Option<&WorkflowDefinition> {
        self.workflows.get(workflow_id)
    }

    fn workflows(&self) -> Vec<(String, WorkflowDefinition)> {
        self.workflows
            .iter()
            .map(|(id, def)| (id.clone(), def.clone()))
            .collect()
    }

    fn limits(&self) -> &CommunicationLimits {
        &self.limits
    }

    fn sla(&self) -> &SlaTargets {
        &self.sla
    }

    fn monitoring(&self) -> &MonitoringConfig {
        &self.monitoring
    }

    fn features(&self) -> &FeatureFlags {
        &self.features
    }
}
