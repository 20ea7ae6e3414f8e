//! TOML-backed policy catalog.
//!
//! `TomlPolicyCatalog` loads a `CatalogDocument` from a TOML string, a file,
//! or the catalog compiled into this crate, validates it, and implements the
//! `PolicySource` trait from conductor-core.

use std::path::Path;

use tracing::{debug, info};

use conductor_contracts::{
    error::{ConductorError, ConductorResult},
    policy::{AgentPolicy, CommunicationLimits, FeatureFlags, MonitoringConfig, SlaTargets, WorkflowDefinition},
};
use conductor_core::traits::PolicySource;

use crate::document::CatalogDocument;

const BUILTIN_CATALOG: &str = include_str!("../catalog/default.toml");

/// A `PolicySource` read from a TOML document.
///
/// ```rust,ignore
/// use conductor_policy::TomlPolicyCatalog;
///
/// let catalog = TomlPolicyCatalog::builtin()?
///     .with_feature("enable_multi_agent_system", true)?;
/// ```
#[derive(Debug, Clone)]
pub struct TomlPolicyCatalog {
    document: CatalogDocument,
}

impl TomlPolicyCatalog {
    /// Parse and validate `s`.
    ///
    /// Returns `ConductorError::ConfigError` if the TOML is malformed, does
    /// not match `CatalogDocument`, or fails structural validation.
    pub fn from_toml_str(s: &str) -> ConductorResult<Self> {
        let document: CatalogDocument = toml::from_str(s).map_err(|e| ConductorError::ConfigError {
            reason: format!("failed to parse policy catalog TOML: {}", e),
        })?;
        document.validate()?;
        debug!(
            agent_types = document.agents.len(),
            workflows = document.workflows.len(),
            "policy catalog loaded"
        );
        Ok(Self { document })
    }

    /// Read the file at `path` and parse it as a policy catalog.
    pub fn from_file(path: &Path) -> ConductorResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConductorError::ConfigError {
            reason: format!("failed to read policy catalog '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// The catalog compiled into this crate. Its feature flags keep the
    /// multi-agent subsystem switched off.
    pub fn builtin() -> ConductorResult<Self> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    /// Override one feature flag before the catalog is shared.
    pub fn with_feature(mut self, flag: &str, enabled: bool) -> ConductorResult<Self> {
        self.document.features.set(flag, enabled)?;
        info!(flag = %flag, enabled, "feature flag overridden");
        Ok(self)
    }

    pub fn document(&self) -> &CatalogDocument {
        &self.document
    }

    /// Agent type names in catalog order.
    pub fn agent_types(&self) -> Vec<String> {
        self.document.agents.keys().cloned().collect()
    }
}

impl PolicySource for TomlPolicyCatalog {
    fn agent_policy(&self, agent_type: &str) -> Option<&AgentPolicy> {
        self.document.agents.get(agent_type)
    }

    fn workflow(&self, workflow_id: &str) -> Option<&WorkflowDefinition> {
        self.document.workflows.get(workflow_id)
    }

    fn workflows(&self) -> Vec<(String, WorkflowDefinition)> {
        self.document
            .workflows
            .iter()
            .map(|(id, definition)| (id.clone(), definition.clone()))
            .collect()
    }

    fn limits(&self) -> &CommunicationLimits {
        &self.document.communication
    }

    fn sla(&self) -> &SlaTargets {
        &self.document.sla
    }

    fn monitoring(&self) -> &MonitoringConfig {
        &self.document.monitoring
    }

    fn features(&self) -> &FeatureFlags {
        &self.document.features
    }
}
