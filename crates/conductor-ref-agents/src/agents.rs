//! Reference agents.
//!
//! Business logic is deliberately trivial: each agent exists to exercise one
//! path through the runtime (identity, transformation, missing response,
//! failure) or to stand in for one of the catalog's agent types.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use conductor_contracts::{
    capability::CapabilityDescriptor,
    error::{ConductorError, ConductorResult},
    message::Message,
    policy::AgentPolicy,
};
use conductor_core::{
    agent::{handler_fn, Agent},
    orchestrator::WORKFLOW_TASK,
    traits::AgentSetup,
};
use conductor_policy::TomlPolicyCatalog;

/// Message type of every reference agent's reply.
pub const WORKFLOW_RESULT: &str = "workflow_result";

// ── Single-purpose agents ─────────────────────────────────────────────────────

/// Replies with its input unchanged.
pub fn echo_agent(agent_id: &str) -> Agent {
    let agent = Agent::new(agent_id, "echo");
    agent.register_handler(
        WORKFLOW_TASK,
        handler_fn(|msg: Message, _ctx| async move {
            Ok(Some(msg.reply(WORKFLOW_RESULT, msg.payload().clone())))
        }),
    );
    agent
}

/// Upper-cases the `text` field. Other fields pass through.
pub fn uppercase_agent(agent_id: &str) -> Agent {
    let agent = Agent::new(agent_id, "uppercase");
    agent.register_handler(
        WORKFLOW_TASK,
        handler_fn(|msg: Message, _ctx| async move {
            let mut out = msg.payload().clone();
            if let Some(Value::String(text)) = out.get("text").cloned() {
                out.insert("text".to_string(), Value::String(text.to_uppercase()));
            }
            Ok(Some(msg.reply(WORKFLOW_RESULT, out)))
        }),
    );
    agent
}

/// Handles every task but never answers.
pub fn silent_agent(agent_id: &str) -> Agent {
    let agent = Agent::new(agent_id, "silent");
    agent.register_handler(WORKFLOW_TASK, handler_fn(|_msg: Message, _ctx| async move { Ok(None) }));
    agent
}

/// Fails every task with `reason`.
pub fn failing_agent(agent_id: &str, reason: &str) -> Agent {
    let agent = Agent::new(agent_id, "failing");
    let reason = reason.to_string();
    agent.register_handler(
        WORKFLOW_TASK,
        handler_fn(move |_msg: Message, _ctx| {
            let reason = reason.clone();
            async move { Err(ConductorError::InvalidMessage { reason }) }
        }),
    );
    agent
}

// ── Catalog stand-ins ─────────────────────────────────────────────────────────

/// Publishes the catalog capabilities during initialization, plus a
/// `workflow_task` capability whose output schema requires the agent's
/// section in the payload.
struct CatalogSetup {
    agent_type: String,
    policy: AgentPolicy,
}

#[async_trait]
impl AgentSetup for CatalogSetup {
    async fn initialize(&self, agent: &Agent) -> ConductorResult<()> {
        for name in &self.policy.capabilities {
            agent.add_capability(CapabilityDescriptor::new(name.as_str(), self.policy.description.as_str()));
        }
        agent.add_capability(
            CapabilityDescriptor::new(WORKFLOW_TASK, "one workflow step")
                .with_input_schema(json!({ "type": "object" }))
                .with_output_schema(json!({
                    "type": "object",
                    "required": [self.agent_type.as_str()]
                })),
        );
        agent.context().set("display_name", json!(self.policy.name));
        debug!(
            agent_id = %agent.agent_id(),
            capabilities = self.policy.capabilities.len(),
            "catalog agent initialized"
        );
        Ok(())
    }
}

/// A stand-in for the catalog agent type `agent_type`.
///
/// Its reply is the input plus a section keyed by the agent type, so the
/// payload accumulates one section per completed step and parallel branches
/// never write the same key.
pub fn catalog_agent(agent_type: &str, policy: &AgentPolicy) -> Agent {
    let agent = Agent::new(policy.id.as_str(), agent_type).with_setup(Arc::new(CatalogSetup {
        agent_type: agent_type.to_string(),
        policy: policy.clone(),
    }));

    let section = agent_type.to_string();
    let agent_id = policy.id.clone();
    let capabilities = policy.capabilities.clone();
    agent.register_handler(
        WORKFLOW_TASK,
        handler_fn(move |msg: Message, _ctx| {
            let section = section.clone();
            let agent_id = agent_id.clone();
            let capabilities = capabilities.clone();
            async move {
                let mut out = msg.payload().clone();
                out.insert(
                    section,
                    json!({
                        "agent_id": agent_id,
                        "status": "completed",
                        "capabilities": capabilities,
                    }),
                );
                Ok(Some(msg.reply(WORKFLOW_RESULT, out)))
            }
        }),
    );
    agent
}

/// One stand-in per agent type in `catalog`, ordered by type name.
pub fn catalog_agents(catalog: &TomlPolicyCatalog) -> Vec<Agent> {
    catalog
        .document()
        .agents
        .iter()
        .map(|(agent_type, policy)| catalog_agent(agent_type, policy))
        .collect()
}
