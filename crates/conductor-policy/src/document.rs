//! The on-disk shape of a policy catalog.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use conductor_contracts::{
    error::{ConductorError, ConductorResult},
    message::Priority,
    policy::{AgentPolicy, CommunicationLimits, FeatureFlags, MonitoringConfig, SlaTargets, WorkflowDefinition},
};

/// Every table of a catalog. Missing tables take the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    /// Keyed by agent type.
    #[serde(default)]
    pub agents: BTreeMap<String, AgentPolicy>,
    /// Keyed by workflow id.
    #[serde(default)]
    pub workflows: BTreeMap<String, WorkflowDefinition>,
    #[serde(default, alias = "communication_rules")]
    pub communication: CommunicationLimits,
    #[serde(default)]
    pub sla: SlaTargets,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub features: FeatureFlags,
}

impl CatalogDocument {
    /// Structural checks that serde cannot express.
    pub fn validate(&self) -> ConductorResult<()> {
        for (agent_type, policy) in &self.agents {
            if policy.queue.trim().is_empty() {
                return Err(ConductorError::ConfigError {
                    reason: format!("agent type '{agent_type}' has an empty queue name"),
                });
            }
            if policy.timeout_seconds == 0 {
                return Err(ConductorError::ConfigError {
                    reason: format!("agent type '{agent_type}' has a zero timeout"),
                });
            }
        }

        for (workflow_id, workflow) in &self.workflows {
            if workflow.agent_sequence.is_empty() {
                return Err(ConductorError::ConfigError {
                    reason: format!("workflow '{workflow_id}' has no steps"),
                });
            }
            workflow.validate()?;
        }

        for (level, value) in &self.communication.priority_levels {
            Priority::new(i64::from(*value)).map_err(|_| ConductorError::ConfigError {
                reason: format!("priority level '{level}' = {value} is outside 1..=10"),
            })?;
        }
        Ok(())
    }
}
