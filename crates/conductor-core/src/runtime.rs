//! The composition root: broker, orchestrator, supervisor and metrics wired
//! from one set of policy tables.
//!
//! A `Runtime` can only be built while `enable_multi_agent_system` is on, so
//! with the flag off no agent starts and no workflow can be executed.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use conductor_contracts::{
    error::{ConductorError, ConductorResult},
    message::Payload,
    policy::FeatureFlags,
    workflow::WorkflowOutcome,
};

use crate::{
    agent::Agent,
    broker::{InProcessBroker, RetryingBroker},
    dispatch::{DirectDispatcher, QueuedDispatcher},
    metrics::{Alert, Metrics},
    orchestrator::{Orchestrator, ORCHESTRATOR_ID},
    supervisor::{Supervisor, SupervisorConfig},
    traits::{Broker, Dispatcher, EventLog, PayloadValidator, PolicySource},
};

/// How workflow steps reach agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// The orchestrator calls the agent's processing step itself.
    Direct,
    /// Steps travel through the broker; replies are awaited up to the timeout.
    Queued { reply_timeout: Duration },
}

pub struct Runtime {
    policies: Arc<dyn PolicySource>,
    router: Arc<InProcessBroker>,
    outbound: Arc<RetryingBroker>,
    orchestrator: Arc<Orchestrator>,
    supervisor: Arc<Supervisor>,
    metrics: Arc<Metrics>,
    validator: Option<Arc<dyn PayloadValidator>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    /// Build a runtime with direct dispatch. Must be called inside a Tokio
    /// runtime: the routing loop and supervisor are spawned here.
    ///
    /// # Errors
    ///
    /// `SubsystemDisabled` when `enable_multi_agent_system` is off, or a
    /// `ConfigError` from loading the catalog workflows.
    pub fn new(
        policies: Arc<dyn PolicySource>,
        event_log: Box<dyn EventLog>,
        validator: Option<Arc<dyn PayloadValidator>>,
    ) -> ConductorResult<Self> {
        Self::build(policies, event_log, validator, DispatchMode::Direct)
    }

    /// Build a runtime that routes workflow steps through the broker.
    pub fn queued(
        policies: Arc<dyn PolicySource>,
        event_log: Box<dyn EventLog>,
        validator: Option<Arc<dyn PayloadValidator>>,
        reply_timeout: Duration,
    ) -> ConductorResult<Self> {
        Self::build(policies, event_log, validator, DispatchMode::Queued { reply_timeout })
    }

    fn build(
        policies: Arc<dyn PolicySource>,
        event_log: Box<dyn EventLog>,
        validator: Option<Arc<dyn PayloadValidator>>,
        mode: DispatchMode,
    ) -> ConductorResult<Self> {
        if !policies.features().enable_multi_agent_system {
            return Err(ConductorError::SubsystemDisabled {
                flag: FeatureFlags::MULTI_AGENT_SYSTEM.to_string(),
            });
        }

        let metrics = Arc::new(Metrics::new());
        let router = Arc::new(InProcessBroker::new(policies.limits().clone()));
        let outbound = Arc::new(RetryingBroker::new(router.clone(), policies.clone()));

        let dispatcher: Arc<dyn Dispatcher> = match mode {
            DispatchMode::Direct => Arc::new(DirectDispatcher),
            DispatchMode::Queued { reply_timeout } => {
                let queued = Arc::new(QueuedDispatcher::new(outbound.clone(), reply_timeout));
                router.register_endpoint(ORCHESTRATOR_ID, queued.clone());
                queued
            }
        };

        let orchestrator = Arc::new(
            Orchestrator::new(event_log)
                .with_dispatcher(dispatcher)
                .with_policies(policies.clone())
                .with_metrics(metrics.clone()),
        );
        let loaded = orchestrator.load_catalog_workflows()?;

        let supervisor = Arc::new(Supervisor::new(SupervisorConfig::default(), outbound.clone()));

        let health_interval = Duration::from_secs(policies.monitoring().health_check_interval_seconds.max(1));
        let tasks = vec![
            {
                let router = router.clone();
                tokio::spawn(async move { router.run().await })
            },
            {
                let supervisor = supervisor.clone();
                tokio::spawn(async move { supervisor.run(health_interval).await })
            },
        ];

        info!(
            dispatch = ?mode,
            workflows = loaded,
            parallel = policies.features().enable_parallel_workflows,
            "runtime started"
        );

        Ok(Self {
            policies,
            router,
            outbound,
            orchestrator,
            supervisor,
            metrics,
            validator,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn broker(&self) -> Arc<dyn Broker> {
        self.outbound.clone()
    }

    pub fn router(&self) -> &Arc<InProcessBroker> {
        &self.router
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Make `agent` routable, register it with the orchestrator and start
    /// its loop under supervision.
    ///
    /// Register handlers on the agent before handing it over. The runtime's
    /// metrics and validator are attached here.
    pub async fn spawn_agent(&self, agent: Agent) -> Arc<Agent> {
        let mut agent = agent.with_metrics(self.metrics.clone());
        if let Some(validator) = &self.validator {
            agent = agent.with_validator(validator.clone());
        }
        let agent = Arc::new(agent);

        let queue = self
            .policies
            .agent_policy(agent.agent_type().as_str())
            .map(|policy| policy.queue.clone());
        self.router.register_agent(&agent, queue.as_deref());
        self.outbound.track(agent.agent_id().clone(), agent.agent_type());
        self.orchestrator.register_agent(agent.clone());
        self.supervisor.supervise(agent.clone()).await;
        agent
    }

    pub async fn execute_workflow(&self, workflow_id: &str, initial_data: Payload) -> ConductorResult<WorkflowOutcome> {
        self.orchestrator.execute_workflow(workflow_id, initial_data).await
    }

    /// Evaluate alert thresholds once.
    pub fn check_alerts(&self) -> Vec<Alert> {
        let depths: BTreeMap<String, usize> = self
            .orchestrator
            .agents()
            .iter()
            .map(|agent| (agent.agent_id().0.clone(), agent.mailbox_len()))
            .collect();
        let alerts = self
            .metrics
            .evaluate_alerts(&self.policies.monitoring().alert_thresholds, &depths, None);
        for alert in &alerts {
            warn!(alert = ?alert, "alert threshold crossed");
        }
        alerts
    }

    /// Apply the event log's retention window once.
    pub fn enforce_retention(&self) -> usize {
        let purged = self.orchestrator.event_log().enforce_retention();
        if purged > 0 {
            info!(purged, "event log retention applied");
        }
        purged
    }

    /// Evaluate alerts and apply event retention every
    /// `metrics_interval_seconds` until shutdown.
    pub fn spawn_monitor(self: &Arc<Self>) {
        let interval = Duration::from_secs(self.policies.monitoring().metrics_interval_seconds.max(1));
        let runtime = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(runtime) = runtime.upgrade() else { return };
                runtime.check_alerts();
                runtime.enforce_retention();
            }
        });
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).push(handle);
    }

    /// Stop every agent, then the routing, supervision and monitor tasks.
    pub async fn shutdown(&self) {
        for handle in self.tasks.lock().unwrap_or_else(PoisonError::into_inner).iter() {
            handle.abort();
        }
        self.supervisor.shutdown_all().await;
        info!("runtime stopped");
    }
}
