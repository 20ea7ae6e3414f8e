//! Static policy tables: agent types, workflows, communication limits, SLA
//! targets, monitoring thresholds and feature flags.
//!
//! These are plain data, loaded once at process start and never mutated while
//! the runtime is running. Every field has a serde default equal to the
//! built-in constant so partial TOML documents stay valid.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{ConductorError, ConductorResult};

// ── Agent types ──────────────────────────────────────────────────────────────

/// Retry parameters declared for one agent type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,
    /// Base delay before the first retry; doubles on each further attempt.
    #[serde(default = "defaults::retry_delay_seconds", alias = "retry_delay")]
    pub retry_delay_seconds: u64,
    /// Upper bound on any single backoff delay.
    #[serde(default = "defaults::max_delay_seconds")]
    pub max_delay_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            retry_delay_seconds: defaults::retry_delay_seconds(),
            max_delay_seconds: defaults::max_delay_seconds(),
        }
    }
}

/// Identity, routing and limits for one agent type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPolicy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Broker queue name, conventionally `agent_<type>`.
    pub queue: String,
    #[serde(default = "defaults::agent_timeout_seconds", alias = "timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

// ── Workflows ────────────────────────────────────────────────────────────────

/// A named, ordered sequence of agent steps with optional parallel groups.
///
/// Steps name either an agent id or an agent type; the orchestrator resolves
/// them at execution time, never at definition time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub agent_sequence: Vec<String>,
    /// Overall deadline for one execution. `None` means unbounded.
    #[serde(default, alias = "timeout")]
    pub timeout_seconds: Option<u64>,
    /// Groups of steps that may run concurrently.
    #[serde(default)]
    pub parallel_steps: Vec<Vec<String>>,
}

/// One entry of `agent_sequence`, tagged with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStep {
    pub index: usize,
    pub step: String,
}

impl StageStep {
    pub fn new(index: usize, step: impl Into<String>) -> Self {
        Self {
            index,
            step: step.into(),
        }
    }
}

/// One unit of workflow execution produced by `WorkflowDefinition::stages`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Sequential(StageStep),
    /// Members in declaration order. Joined before the next stage starts.
    Parallel(Vec<StageStep>),
}

impl WorkflowDefinition {
    /// A purely sequential workflow with no deadline.
    pub fn sequential(name: impl Into<String>, agent_sequence: Vec<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            agent_sequence,
            timeout_seconds: None,
            parallel_steps: Vec::new(),
        }
    }

    /// Check that parallel groups are non-empty, disjoint, and drawn from
    /// `agent_sequence`, where each grouped step appears exactly once.
    pub fn validate(&self) -> ConductorResult<()> {
        let mut grouped: HashSet<&str> = HashSet::new();

        for group in &self.parallel_steps {
            if group.is_empty() {
                return Err(ConductorError::ConfigError {
                    reason: format!("workflow '{}' declares an empty parallel group", self.name),
                });
            }
            for step in group {
                let occurrences = self.agent_sequence.iter().filter(|s| *s == step).count();
                if occurrences == 0 {
                    return Err(ConductorError::ConfigError {
                        reason: format!(
                            "workflow '{}' parallel group names '{}' which is not in its agent sequence",
                            self.name, step
                        ),
                    });
                }
                if occurrences > 1 {
                    return Err(ConductorError::ConfigError {
                        reason: format!(
                            "workflow '{}' groups '{}' which appears {} times in its agent sequence",
                            self.name, step, occurrences
                        ),
                    });
                }
                if !grouped.insert(step.as_str()) {
                    return Err(ConductorError::ConfigError {
                        reason: format!(
                            "workflow '{}' lists '{}' in more than one parallel group",
                            self.name, step
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// One `Sequential` stage per entry of `agent_sequence`, ignoring groups.
    pub fn sequential_stages(&self) -> Vec<Stage> {
        self.agent_sequence
            .iter()
            .enumerate()
            .map(|(index, step)| Stage::Sequential(StageStep::new(index, step.clone())))
            .collect()
    }

    /// Compile the sequence into ordered stages.
    ///
    /// A parallel group becomes a single stage placed where its first member
    /// appears in `agent_sequence`; the positions of its other members are
    /// skipped when they come up later. Ungrouped steps run once per
    /// occurrence.
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = Vec::new();
        let mut consumed: HashSet<usize> = HashSet::new();

        for (index, step) in self.agent_sequence.iter().enumerate() {
            if consumed.contains(&index) {
                continue;
            }
            let group = self
                .parallel_steps
                .iter()
                .find(|g| g.iter().any(|s| s == step));

            match group {
                Some(group) if group.len() > 1 => {
                    let members: Vec<StageStep> = self
                        .agent_sequence
                        .iter()
                        .enumerate()
                        .skip(index)
                        .filter(|(i, s)| !consumed.contains(i) && group.contains(*s))
                        .map(|(i, s)| StageStep::new(i, s.clone()))
                        .collect();
                    consumed.extend(members.iter().map(|m| m.index));
                    stages.push(Stage::Parallel(members));
                }
                _ => stages.push(Stage::Sequential(StageStep::new(index, step.clone()))),
            }
        }
        stages
    }
}

// ── Process-wide limits ──────────────────────────────────────────────────────

/// Communication limits applied by the broker and the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationLimits {
    #[serde(default = "defaults::message_ttl_seconds", alias = "message_ttl")]
    pub message_ttl_seconds: u64,
    #[serde(default = "defaults::max_message_size_bytes", alias = "max_message_size")]
    pub max_message_size_bytes: usize,
    #[serde(default = "defaults::priority_levels")]
    pub priority_levels: BTreeMap<String, u8>,
    #[serde(default = "defaults::event_retention_seconds", alias = "event_retention")]
    pub event_retention_seconds: u64,
    #[serde(default = "defaults::workflow_retention_seconds", alias = "workflow_retention")]
    pub workflow_retention_seconds: u64,
}

impl Default for CommunicationLimits {
    fn default() -> Self {
        Self {
            message_ttl_seconds: defaults::message_ttl_seconds(),
            max_message_size_bytes: defaults::max_message_size_bytes(),
            priority_levels: defaults::priority_levels(),
            event_retention_seconds: defaults::event_retention_seconds(),
            workflow_retention_seconds: defaults::workflow_retention_seconds(),
        }
    }
}

/// Expected latencies, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaTargets {
    #[serde(default = "defaults::agent_startup_seconds", alias = "agent_startup_time")]
    pub agent_startup_seconds: f64,
    /// Keyed by agent type.
    #[serde(default, alias = "message_processing_time")]
    pub message_processing_seconds: BTreeMap<String, f64>,
    /// Keyed by workflow id.
    #[serde(default, alias = "workflow_completion_time")]
    pub workflow_completion_seconds: BTreeMap<String, f64>,
}

impl Default for SlaTargets {
    fn default() -> Self {
        Self {
            agent_startup_seconds: defaults::agent_startup_seconds(),
            message_processing_seconds: BTreeMap::new(),
            workflow_completion_seconds: BTreeMap::new(),
        }
    }
}

/// Alert thresholds evaluated against runtime metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Fraction of failed messages, `0.05` = 5%.
    #[serde(default = "defaults::error_rate")]
    pub error_rate: f64,
    #[serde(default = "defaults::latency_p95_ms")]
    pub latency_p95_ms: u64,
    #[serde(default = "defaults::queue_depth")]
    pub queue_depth: usize,
    /// Fraction of available memory, `0.8` = 80%.
    #[serde(default = "defaults::memory_usage")]
    pub memory_usage: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            error_rate: defaults::error_rate(),
            latency_p95_ms: defaults::latency_p95_ms(),
            queue_depth: defaults::queue_depth(),
            memory_usage: defaults::memory_usage(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "defaults::metrics_interval_seconds", alias = "metrics_interval")]
    pub metrics_interval_seconds: u64,
    #[serde(default = "defaults::health_check_interval_seconds", alias = "health_check_interval")]
    pub health_check_interval_seconds: u64,
    #[serde(default = "defaults::dashboard_refresh_seconds", alias = "dashboard_refresh")]
    pub dashboard_refresh_seconds: u64,
    #[serde(default)]
    pub alert_thresholds: AlertThresholds,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_interval_seconds: defaults::metrics_interval_seconds(),
            health_check_interval_seconds: defaults::health_check_interval_seconds(),
            dashboard_refresh_seconds: defaults::dashboard_refresh_seconds(),
            alert_thresholds: AlertThresholds::default(),
        }
    }
}

/// Process-wide feature gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default)]
    pub enable_multi_agent_system: bool,
    #[serde(default)]
    pub enable_parallel_workflows: bool,
    #[serde(default)]
    pub enable_external_integrations: bool,
    #[serde(default)]
    pub enable_ml_optimization: bool,
    #[serde(default)]
    pub enable_auto_scaling: bool,
    #[serde(default = "defaults::debug_mode")]
    pub debug_mode: bool,
}

impl FeatureFlags {
    pub const MULTI_AGENT_SYSTEM: &'static str = "enable_multi_agent_system";
    pub const PARALLEL_WORKFLOWS: &'static str = "enable_parallel_workflows";

    /// Look up a flag by name. Unknown names are off.
    pub fn is_enabled(&self, flag: &str) -> bool {
        match flag {
            "enable_multi_agent_system" => self.enable_multi_agent_system,
            "enable_parallel_workflows" => self.enable_parallel_workflows,
            "enable_external_integrations" => self.enable_external_integrations,
            "enable_ml_optimization" => self.enable_ml_optimization,
            "enable_auto_scaling" => self.enable_auto_scaling,
            "debug_mode" => self.debug_mode,
            _ => false,
        }
    }

    /// Set a flag by name. Returns `ConfigError` for unknown names.
    pub fn set(&mut self, flag: &str, enabled: bool) -> ConductorResult<()> {
        let slot = match flag {
            "enable_multi_agent_system" => &mut self.enable_multi_agent_system,
            "enable_parallel_workflows" => &mut self.enable_parallel_workflows,
            "enable_external_integrations" => &mut self.enable_external_integrations,
            "enable_ml_optimization" => &mut self.enable_ml_optimization,
            "enable_auto_scaling" => &mut self.enable_auto_scaling,
            "debug_mode" => &mut self.debug_mode,
            other => {
                return Err(ConductorError::ConfigError {
                    reason: format!("unknown feature flag '{other}'"),
                })
            }
        };
        *slot = enabled;
        Ok(())
    }
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_multi_agent_system: false,
            enable_parallel_workflows: false,
            enable_external_integrations: false,
            enable_ml_optimization: false,
            enable_auto_scaling: false,
            debug_mode: defaults::debug_mode(),
        }
    }
}

mod defaults {
    use std::collections::BTreeMap;

    pub fn max_retries() -> u32 {
        3
    }
    pub fn retry_delay_seconds() -> u64 {
        30
    }
    pub fn max_delay_seconds() -> u64 {
        600
    }
    pub fn agent_timeout_seconds() -> u64 {
        300
    }
    pub fn message_ttl_seconds() -> u64 {
        3600
    }
    pub fn max_message_size_bytes() -> usize {
        1_048_576
    }
    pub fn priority_levels() -> BTreeMap<String, u8> {
        [("critical", 10), ("high", 8), ("normal", 5), ("low", 3)]
            .into_iter()
            .map(|(name, level)| (name.to_string(), level))
            .collect()
    }
    pub fn event_retention_seconds() -> u64 {
        86_400 * 7
    }
    pub fn workflow_retention_seconds() -> u64 {
        86_400 * 30
    }
    pub fn agent_startup_seconds() -> f64 {
        5.0
    }
    pub fn error_rate() -> f64 {
        0.05
    }
    pub fn latency_p95_ms() -> u64 {
        2000
    }
    pub fn queue_depth() -> usize {
        100
    }
    pub fn memory_usage() -> f64 {
        0.8
    }
    pub fn metrics_interval_seconds() -> u64 {
        60
    }
    pub fn health_check_interval_seconds() -> u64 {
        30
    }
    pub fn dashboard_refresh_seconds() -> u64 {
        5
    }
    pub fn debug_mode() -> bool {
        true
    }
}
