//! The orchestrator: agent registry, workflow catalog and workflow execution.
//!
//! ```text
//! execute_workflow(id, data)
//!   ├─ unknown id            → Err(UnknownWorkflow)
//!   ├─ new correlation id
//!   └─ for each stage:
//!        Sequential(step)     → resolve → dispatch(workflow_task) → append reply → data = reply.payload
//!        Parallel(steps)      → dispatch all with the same data → merge replies in declaration order
//!        no reply / failure   → stop, outcome Incomplete with the last good data
//! ```
//!
//! Step failures are not errors: the caller gets a `WorkflowOutcome` with the
//! best payload reached. Configuration mistakes (unknown workflow or agent, a
//! disabled subsystem) are returned as `Err`.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, PoisonError, RwLock},
    time::{Duration, Instant},
};

use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, error, info, warn};

use conductor_contracts::{
    agent::{AgentId, AgentState},
    error::{ConductorError, ConductorResult},
    message::{CorrelationId, Message, Payload},
    policy::{FeatureFlags, Stage, StageStep, WorkflowDefinition},
    workflow::{WorkflowOutcome, WorkflowStatus},
};

use crate::{
    agent::Agent,
    dispatch::DirectDispatcher,
    metrics::Metrics,
    traits::{Dispatcher, EventLog, PolicySource},
};

/// The `source_agent` of every workflow step message.
pub const ORCHESTRATOR_ID: &str = "orchestrator";

/// The `message_type` of every workflow step message.
pub const WORKFLOW_TASK: &str = "workflow_task";

const DEFAULT_MAX_PARALLEL: usize = 4;

/// How the outputs of a parallel stage are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Keys from later branches (in declaration order) overwrite earlier ones.
    #[default]
    LastWriterWins,
    /// Two branches writing different values to the same key fail the stage.
    RejectConflicts,
}

struct StepFailure {
    index: usize,
    agent: String,
    reason: String,
}

/// Everything a step needs, cloneable into a spawned branch.
#[derive(Clone)]
struct StepRunner {
    dispatcher: Arc<dyn Dispatcher>,
    policies: Option<Arc<dyn PolicySource>>,
    metrics: Arc<Metrics>,
}

impl StepRunner {
    /// Dispatch one step and return its reply, or the reason it produced none.
    async fn run(
        &self,
        agent: Arc<Agent>,
        payload: Payload,
        correlation_id: CorrelationId,
    ) -> Result<Message, String> {
        let agent_type = agent.agent_type().as_str().to_string();
        let message = Message::new(ORCHESTRATOR_ID, agent.agent_id().clone(), WORKFLOW_TASK, payload)
            .with_correlation(correlation_id);
        let message_id = message.id();
        let deadline = self
            .policies
            .as_ref()
            .and_then(|p| p.agent_policy(&agent_type))
            .map(|policy| Duration::from_secs(policy.timeout_seconds));

        debug!(
            agent_id = %agent.agent_id(),
            message_id = %message_id,
            correlation_id = %correlation_id,
            "dispatching workflow step"
        );

        let started = Instant::now();
        let dispatched = self.dispatcher.dispatch(&agent, message);
        let result = match deadline {
            Some(limit) => tokio::time::timeout(limit, dispatched)
                .await
                .unwrap_or_else(|_| {
                    Err(ConductorError::DeadlineExceeded {
                        scope: format!("step '{}'", agent.agent_id()),
                        timeout_ms: limit.as_millis() as u64,
                    })
                }),
            None => dispatched.await,
        };
        self.check_sla(&agent_type, started.elapsed());

        match result {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(format!("agent '{}' produced no response", agent.agent_id())),
            Err(e) => Err(e.to_string()),
        }
    }

    fn check_sla(&self, agent_type: &str, elapsed: Duration) {
        let Some(policies) = &self.policies else { return };
        let Some(target) = policies.sla().message_processing_seconds.get(agent_type) else {
            return;
        };
        if elapsed.as_secs_f64() > *target {
            self.metrics.record_sla_breach(agent_type);
            warn!(
                agent_type = %agent_type,
                elapsed_ms = elapsed.as_millis() as u64,
                target_seconds = *target,
                "processing SLA breached"
            );
        }
    }
}

struct Progress {
    payload: Payload,
    completed: usize,
    current_index: usize,
    current_step: String,
}

/// Coordinates registered agents through named workflows.
///
/// Registry, catalog and event log are the only shared state; each sits
/// behind its own lock so concurrent registration and execution cannot
/// corrupt them.
pub struct Orchestrator {
    agents: RwLock<HashMap<AgentId, Arc<Agent>>>,
    workflows: RwLock<HashMap<String, WorkflowDefinition>>,
    event_log: Box<dyn EventLog>,
    runner: StepRunner,
    merge_policy: MergePolicy,
    max_parallel: usize,
}

impl Orchestrator {
    /// An orchestrator dispatching directly, with no policy tables.
    pub fn new(event_log: Box<dyn EventLog>) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            workflows: RwLock::new(HashMap::new()),
            event_log,
            runner: StepRunner {
                dispatcher: Arc::new(DirectDispatcher),
                policies: None,
                metrics: Arc::new(Metrics::new()),
            },
            merge_policy: MergePolicy::default(),
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.runner.dispatcher = dispatcher;
        self
    }

    /// Attach policy tables: step deadlines, SLA targets and feature flags.
    pub fn with_policies(mut self, policies: Arc<dyn PolicySource>) -> Self {
        self.runner.policies = Some(policies);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.runner.metrics = metrics;
        self
    }

    pub fn with_merge_policy(mut self, merge_policy: MergePolicy) -> Self {
        self.merge_policy = merge_policy;
        self
    }

    /// Upper bound on concurrently running branches of one parallel stage.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    // ── Registry ─────────────────────────────────────────────────────────────

    /// Add `agent` to the registry. A duplicate id replaces the earlier agent.
    pub fn register_agent(&self, agent: Arc<Agent>) {
        info!(
            agent_id = %agent.agent_id(),
            agent_type = %agent.agent_type(),
            "agent registered"
        );
        self.agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent.agent_id().clone(), agent);
    }

    pub fn agent(&self, agent_id: &AgentId) -> Option<Arc<Agent>> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agent_id)
            .cloned()
    }

    pub fn agents(&self) -> Vec<Arc<Agent>> {
        let mut agents: Vec<Arc<Agent>> = self
            .agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.agent_id().cmp(b.agent_id()));
        agents
    }

    /// Snapshot of every registered agent's lifecycle state.
    pub fn get_agent_status(&self) -> BTreeMap<String, AgentState> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, agent)| (id.0.clone(), agent.state()))
            .collect()
    }

    /// A step names an agent id or, failing that, an agent type. Among agents
    /// of a type, the first by id that can still accept work is chosen.
    fn resolve(&self, step: &str) -> ConductorResult<Arc<Agent>> {
        let agents = self.agents.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(agent) = agents.get(&AgentId::new(step)) {
            return Ok(agent.clone());
        }

        let mut of_type: Vec<&Arc<Agent>> = agents
            .values()
            .filter(|agent| agent.agent_type().as_str() == step)
            .collect();
        of_type.sort_by(|a, b| a.agent_id().cmp(b.agent_id()));
        of_type
            .iter()
            .find(|agent| !agent.state().is_halted())
            .or_else(|| of_type.first())
            .map(|agent| Arc::clone(*agent))
            .ok_or_else(|| ConductorError::UnknownAgent {
                agent_id: step.to_string(),
            })
    }

    // ── Catalog ──────────────────────────────────────────────────────────────

    /// Store a purely sequential workflow. Steps are not checked until
    /// execution.
    pub fn define_workflow(&self, workflow_id: impl Into<String>, agent_sequence: Vec<String>) {
        let workflow_id = workflow_id.into();
        let definition = WorkflowDefinition::sequential(workflow_id.clone(), agent_sequence);
        self.store_workflow(workflow_id, definition);
    }

    /// Store a full definition, parallel groups included.
    pub fn define_workflow_from(
        &self,
        workflow_id: impl Into<String>,
        definition: WorkflowDefinition,
    ) -> ConductorResult<()> {
        definition.validate()?;
        self.store_workflow(workflow_id.into(), definition);
        Ok(())
    }

    fn store_workflow(&self, workflow_id: String, definition: WorkflowDefinition) {
        debug!(
            workflow_id = %workflow_id,
            steps = definition.agent_sequence.len(),
            parallel_groups = definition.parallel_steps.len(),
            "workflow defined"
        );
        self.workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(workflow_id, definition);
    }

    /// Define every workflow in the attached policy catalog. Returns how many
    /// were loaded.
    pub fn load_catalog_workflows(&self) -> ConductorResult<usize> {
        let Some(policies) = &self.runner.policies else {
            return Ok(0);
        };
        let workflows = policies.workflows();
        let count = workflows.len();
        for (workflow_id, definition) in workflows {
            self.define_workflow_from(workflow_id, definition)?;
        }
        Ok(count)
    }

    pub fn event_log(&self) -> &dyn EventLog {
        self.event_log.as_ref()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.runner.metrics
    }

    fn features(&self) -> FeatureFlags {
        self.runner
            .policies
            .as_ref()
            .map(|p| p.features().clone())
            .unwrap_or_else(|| FeatureFlags {
                enable_multi_agent_system: true,
                ..FeatureFlags::default()
            })
    }

    // ── Execution ────────────────────────────────────────────────────────────

    /// Run `workflow_id` over `initial_data`.
    ///
    /// Every step message shares one correlation id, and every reply is
    /// appended to the event log in step order. Steps run strictly in
    /// declaration order; a parallel group runs concurrently only when
    /// `enable_parallel_workflows` is on.
    ///
    /// # Errors
    ///
    /// - `SubsystemDisabled` when `enable_multi_agent_system` is off
    /// - `UnknownWorkflow` when `workflow_id` was never defined
    /// - `UnknownAgent` when a step names no registered agent
    /// - event log append failures
    pub async fn execute_workflow(&self, workflow_id: &str, initial_data: Payload) -> ConductorResult<WorkflowOutcome> {
        let features = self.features();
        if !features.enable_multi_agent_system {
            return Err(ConductorError::SubsystemDisabled {
                flag: FeatureFlags::MULTI_AGENT_SYSTEM.to_string(),
            });
        }

        let definition = self
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| ConductorError::UnknownWorkflow {
                workflow_id: workflow_id.to_string(),
            })?;

        let correlation_id = CorrelationId::new();
        let stages = if features.enable_parallel_workflows {
            definition.stages()
        } else {
            definition.sequential_stages()
        };
        info!(
            workflow_id = %workflow_id,
            correlation_id = %correlation_id,
            steps = definition.agent_sequence.len(),
            stages = stages.len(),
            "workflow started"
        );

        let started = Instant::now();
        let mut progress = Progress {
            payload: initial_data,
            completed: 0,
            current_index: 0,
            current_step: definition.agent_sequence.first().cloned().unwrap_or_default(),
        };

        let run = self.run_stages(&stages, correlation_id, &mut progress);
        let timed = match definition.timeout_seconds {
            Some(seconds) => tokio::time::timeout(Duration::from_secs(seconds), run).await.map_err(|_| seconds),
            None => Ok(run.await),
        };
        let failure = match timed {
            Ok(result) => result?,
            Err(seconds) => Some(StepFailure {
                index: progress.current_index,
                agent: progress.current_step.clone(),
                reason: format!("workflow '{workflow_id}' exceeded its deadline of {seconds}s"),
            }),
        };

        let elapsed = started.elapsed();
        self.check_workflow_sla(workflow_id, elapsed);

        let status = match failure {
            None => {
                info!(
                    workflow_id = %workflow_id,
                    correlation_id = %correlation_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "workflow completed"
                );
                WorkflowStatus::Completed
            }
            Some(failure) => {
                error!(
                    workflow_id = %workflow_id,
                    correlation_id = %correlation_id,
                    failed_step = failure.index,
                    agent = %failure.agent,
                    reason = %failure.reason,
                    "workflow stopped early"
                );
                WorkflowStatus::Incomplete {
                    failed_step: failure.index,
                    agent: failure.agent,
                    reason: failure.reason,
                }
            }
        };

        Ok(WorkflowOutcome {
            workflow_id: workflow_id.to_string(),
            correlation_id,
            payload: progress.payload,
            steps_declared: definition.agent_sequence.len(),
            steps_completed: progress.completed,
            status,
        })
    }

    async fn run_stages(
        &self,
        stages: &[Stage],
        correlation_id: CorrelationId,
        progress: &mut Progress,
    ) -> ConductorResult<Option<StepFailure>> {
        for stage in stages {
            match stage {
                Stage::Sequential(StageStep { index, step }) => {
                    progress.current_index = *index;
                    progress.current_step = step.clone();
                    let agent = self.resolve(step)?;
                    match self.runner.run(agent, progress.payload.clone(), correlation_id).await {
                        Ok(reply) => {
                            self.event_log.append(&reply)?;
                            progress.payload = reply.into_payload();
                            progress.completed += 1;
                        }
                        Err(reason) => {
                            return Ok(Some(StepFailure {
                                index: *index,
                                agent: step.clone(),
                                reason,
                            }))
                        }
                    }
                }
                Stage::Parallel(steps) => {
                    progress.current_index = steps.first().map(|s| s.index).unwrap_or_default();
                    progress.current_step = steps.iter().map(|s| s.step.as_str()).collect::<Vec<_>>().join(",");
                    if let Some(failure) = self.run_parallel(steps, correlation_id, progress).await? {
                        return Ok(Some(failure));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Run every branch on the same input, then merge. Replies reach the
    /// event log and the completed count only once the whole stage merged.
    async fn run_parallel(
        &self,
        steps: &[StageStep],
        correlation_id: CorrelationId,
        progress: &mut Progress,
    ) -> ConductorResult<Option<StepFailure>> {
        // Resolve everything before anything runs.
        let agents = steps
            .iter()
            .map(|s| self.resolve(&s.step))
            .collect::<ConductorResult<Vec<_>>>()?;

        let permits = Arc::new(Semaphore::new(self.max_parallel));
        let mut branches = JoinSet::new();
        for (slot, agent) in agents.into_iter().enumerate() {
            let runner = self.runner.clone();
            let permits = permits.clone();
            let input = progress.payload.clone();
            branches.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (slot, runner.run(agent, input, correlation_id).await)
            });
        }

        let mut results: Vec<Option<Result<Message, String>>> = vec![None; steps.len()];
        while let Some(joined) = branches.join_next().await {
            match joined {
                Ok((slot, result)) => results[slot] = Some(result),
                Err(e) => {
                    // The slot is unknown; charge the first branch still unresolved.
                    if let Some(open) = results.iter_mut().find(|r| r.is_none()) {
                        *open = Some(Err(format!("parallel branch lost: {e}")));
                    }
                }
            }
        }

        let mut merged = Payload::new();
        let mut written_by: HashMap<String, usize> = HashMap::new();
        let mut replies = Vec::with_capacity(steps.len());
        for (slot, result) in results.into_iter().enumerate() {
            let StageStep { index, step } = &steps[slot];
            let reply = match result {
                Some(Ok(reply)) => reply,
                Some(Err(reason)) => {
                    return Ok(Some(StepFailure {
                        index: *index,
                        agent: step.clone(),
                        reason,
                    }))
                }
                None => {
                    return Ok(Some(StepFailure {
                        index: *index,
                        agent: step.clone(),
                        reason: "parallel branch did not finish".to_string(),
                    }))
                }
            };

            for (key, value) in reply.payload() {
                if self.merge_policy == MergePolicy::RejectConflicts {
                    if let (Some(existing), Some(&writer)) = (merged.get(key), written_by.get(key)) {
                        if existing != value {
                            return Ok(Some(StepFailure {
                                index: *index,
                                agent: step.clone(),
                                reason: format!(
                                    "merge conflict on '{key}' between '{}' and '{step}'",
                                    steps[writer].step
                                ),
                            }));
                        }
                    }
                }
                merged.insert(key.clone(), value.clone());
                written_by.insert(key.clone(), slot);
            }
            replies.push(reply);
        }

        for reply in &replies {
            self.event_log.append(reply)?;
        }
        progress.completed += replies.len();
        progress.payload = merged;
        Ok(None)
    }

    fn check_workflow_sla(&self, workflow_id: &str, elapsed: Duration) {
        let Some(policies) = &self.runner.policies else { return };
        let Some(target) = policies.sla().workflow_completion_seconds.get(workflow_id) else {
            return;
        };
        if elapsed.as_secs_f64() > *target {
            self.runner.metrics.record_sla_breach(workflow_id);
            warn!(
                workflow_id = %workflow_id,
                elapsed_ms = elapsed.as_millis() as u64,
                target_seconds = *target,
                "workflow completion SLA breached"
            );
        }
    }
}
