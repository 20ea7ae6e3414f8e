//! Restarts agents that halted in `ERROR`.
//!
//! Agents are fail-stop: a dispatch failure ends their loop. The supervisor
//! notices, resets the agent to `INITIALIZING` and runs `start()` again after
//! an exponential backoff. After `max_restarts` the circuit opens and the
//! agent is left in `ERROR`.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use conductor_contracts::{
    agent::{AgentId, AgentState},
    error::{ConductorError, ConductorResult},
};

use crate::{agent::Agent, traits::Broker};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub max_restarts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl SupervisorConfig {
    /// `base_backoff * 2^restarts`, capped at `max_backoff`.
    pub fn backoff(&self, restarts: u32) -> Duration {
        let factor = 2u32.checked_pow(restarts).unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// What one supervision pass did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SupervisorAction {
    Restarted { agent_id: String, attempt: u32 },
    GaveUp { agent_id: String, reason: String },
}

struct Supervised {
    agent: Arc<Agent>,
    restarts: u32,
    circuit_open: bool,
    /// A pass is backing off before restarting this agent.
    restarting: bool,
    handle: Option<JoinHandle<ConductorResult<()>>>,
}

/// A restart picked by a pass, carried out after the registry lock is gone.
struct DueRestart {
    agent: Arc<Agent>,
    restarts: u32,
    previous: Option<JoinHandle<ConductorResult<()>>>,
}

pub struct Supervisor {
    config: SupervisorConfig,
    broker: Arc<dyn Broker>,
    agents: tokio::sync::Mutex<Vec<Supervised>>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, broker: Arc<dyn Broker>) -> Self {
        Self {
            config,
            broker,
            agents: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    fn spawn_loop(&self, agent: &Arc<Agent>) -> JoinHandle<ConductorResult<()>> {
        tokio::spawn(Arc::clone(agent).start(self.broker.clone()))
    }

    /// Start `agent`'s loop and watch it.
    pub async fn supervise(&self, agent: Arc<Agent>) {
        let handle = self.spawn_loop(&agent);
        info!(agent_id = %agent.agent_id(), "agent supervised");
        self.agents.lock().await.push(Supervised {
            agent,
            restarts: 0,
            circuit_open: false,
            restarting: false,
            handle: Some(handle),
        });
    }

    /// Restarts performed so far for `agent_id`.
    pub async fn restart_count(&self, agent_id: &AgentId) -> Option<u32> {
        self.agents
            .lock()
            .await
            .iter()
            .find(|s| s.agent.agent_id() == agent_id)
            .map(|s| s.restarts)
    }

    /// One supervision pass over every watched agent.
    ///
    /// The registry is locked only to pick agents; backoff sleeps happen
    /// without it so `supervise` is never blocked by a pending restart.
    pub async fn check_once(&self) -> Vec<SupervisorAction> {
        let mut actions = Vec::new();
        let mut retired = Vec::new();
        let mut due = Vec::new();

        {
            let mut agents = self.agents.lock().await;
            for entry in agents.iter_mut() {
                if entry.circuit_open || entry.restarting || entry.agent.state() != AgentState::Error {
                    continue;
                }
                let agent_id = entry.agent.agent_id().clone();

                if entry.restarts >= self.config.max_restarts {
                    entry.circuit_open = true;
                    if let Some(handle) = entry.handle.take() {
                        retired.push((entry.agent.clone(), handle));
                    }
                    let err = ConductorError::RestartLimitExceeded {
                        agent_id: agent_id.0.clone(),
                        max_restarts: self.config.max_restarts,
                    };
                    error!(agent_id = %agent_id, error = %err, "restart limit reached, agent left in error");
                    actions.push(SupervisorAction::GaveUp {
                        agent_id: agent_id.0.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }

                entry.restarting = true;
                due.push(DueRestart {
                    agent: entry.agent.clone(),
                    restarts: entry.restarts,
                    previous: entry.handle.take(),
                });
            }
        }

        for (agent, handle) in retired {
            reap(&agent, handle).await;
        }

        for restart in due {
            let agent_id = restart.agent.agent_id().clone();
            // The loop is on its way out; let it finish before starting another.
            if let Some(handle) = restart.previous {
                reap(&restart.agent, handle).await;
            }

            let delay = self.config.backoff(restart.restarts);
            tokio::time::sleep(delay).await;

            let handle = match restart.agent.reset_for_restart() {
                Ok(()) => Some(self.spawn_loop(&restart.agent)),
                Err(e) => {
                    // Shut down or reset elsewhere while we waited.
                    warn!(agent_id = %agent_id, error = %e, "restart skipped");
                    None
                }
            };

            let mut agents = self.agents.lock().await;
            let Some(entry) = agents.iter_mut().find(|s| Arc::ptr_eq(&s.agent, &restart.agent)) else {
                continue;
            };
            entry.restarting = false;
            let Some(handle) = handle else { continue };
            entry.restarts += 1;
            entry.handle = Some(handle);
            warn!(
                agent_id = %agent_id,
                attempt = entry.restarts,
                delay_ms = delay.as_millis() as u64,
                "agent restarted"
            );
            actions.push(SupervisorAction::Restarted {
                agent_id: agent_id.0.clone(),
                attempt: entry.restarts,
            });
        }
        actions
    }

    /// Supervise forever, one pass per `interval`.
    pub async fn run(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.check_once().await;
        }
    }

    /// Shut every watched agent down and wait for its loop to end.
    pub async fn shutdown_all(&self) {
        let mut agents = self.agents.lock().await;
        for entry in agents.iter_mut() {
            entry.agent.shutdown();
            if let Some(handle) = entry.handle.take() {
                handle.await.ok();
            }
        }
    }
}

/// Wait for a halted agent's loop to return.
async fn reap(agent: &Agent, handle: JoinHandle<ConductorResult<()>>) {
    agent.wake();
    if let Ok(Err(e)) = handle.await {
        warn!(agent_id = %agent.agent_id(), error = %e, "agent loop ended");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use serde_json::json;

    use conductor_contracts::{
        capability::CapabilityDescriptor,
        message::{payload_from_json, Message},
    };

    use super::*;
    use crate::{agent::handler_fn, testing::RecordingBroker, traits::AgentSetup};

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            max_restarts: 2,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
        }
    }

    fn task() -> Message {
        Message::new("tester", "a1", "task", payload_from_json(json!({})).unwrap())
    }

    async fn wait_for_state(agent: &Agent, target: AgentState) {
        let mut rx = agent.subscribe_state();
        while *rx.borrow_and_update() != target {
            rx.changed().await.unwrap();
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let c = config();
        assert_eq!(c.backoff(0), Duration::from_millis(10));
        assert_eq!(c.backoff(2), Duration::from_millis(40));
        assert_eq!(c.backoff(10), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn restarts_agent_after_handler_failure() {
        let agent = Arc::new(Agent::new("a1", "echo").with_poll_interval(Duration::from_millis(10)));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        agent.register_handler(
            "task",
            handler_fn(move |msg: Message, _ctx| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ConductorError::InvalidMessage {
                            reason: "first call fails".to_string(),
                        })
                    } else {
                        Ok(Some(msg.reply("done", Default::default())))
                    }
                }
            }),
        );
        let broker = Arc::new(RecordingBroker::default());
        let supervisor = Supervisor::new(config(), broker.clone());

        agent.receive_message(task());
        agent.receive_message(task());
        supervisor.supervise(agent.clone()).await;
        wait_for_state(&agent, AgentState::Error).await;

        let actions = supervisor.check_once().await;
        assert_eq!(
            actions,
            vec![SupervisorAction::Restarted {
                agent_id: "a1".to_string(),
                attempt: 1
            }]
        );

        while broker.sent().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(supervisor.restart_count(agent.agent_id()).await, Some(1));

        supervisor.shutdown_all().await;
        assert_eq!(agent.state(), AgentState::Terminated);
    }

    struct AlwaysFails(AtomicU32);

    #[async_trait]
    impl AgentSetup for AlwaysFails {
        async fn initialize(&self, _agent: &Agent) -> ConductorResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ConductorError::ConfigError {
                reason: "no database".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn circuit_opens_after_max_restarts() {
        let setup = Arc::new(AlwaysFails(AtomicU32::new(0)));
        let agent = Arc::new(Agent::new("a1", "echo").with_setup(setup.clone()));
        let supervisor = Supervisor::new(config(), Arc::new(RecordingBroker::default()));
        supervisor.supervise(agent.clone()).await;

        let mut gave_up = false;
        for _ in 0..10 {
            wait_for_state(&agent, AgentState::Error).await;
            let actions = supervisor.check_once().await;
            if actions.iter().any(|a| matches!(a, SupervisorAction::GaveUp { .. })) {
                gave_up = true;
                break;
            }
        }

        assert!(gave_up);
        assert_eq!(setup.0.load(Ordering::SeqCst), 3, "initial start plus two restarts");
        assert_eq!(agent.state(), AgentState::Error);
        assert!(supervisor.check_once().await.is_empty(), "open circuit stays quiet");
    }

    #[tokio::test]
    async fn healthy_agents_are_left_alone() {
        let agent = Arc::new(Agent::new("a1", "echo").with_poll_interval(Duration::from_millis(10)));
        let supervisor = Supervisor::new(config(), Arc::new(RecordingBroker::default()));
        supervisor.supervise(agent.clone()).await;
        wait_for_state(&agent, AgentState::Ready).await;

        assert!(supervisor.check_once().await.is_empty());
        supervisor.shutdown_all().await;
    }

    /// The first `task` fails, later ones succeed.
    fn fail_first_task(agent: &Agent) {
        let calls = Arc::new(AtomicU32::new(0));
        agent.register_handler(
            "task",
            handler_fn(move |_msg: Message, _ctx| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ConductorError::InvalidMessage {
                            reason: "first call fails".to_string(),
                        })
                    } else {
                        Ok(None)
                    }
                }
            }),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_does_not_block_supervise() {
        let slow = SupervisorConfig {
            max_restarts: 2,
            base_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(60),
        };
        let supervisor = Supervisor::new(slow, Arc::new(RecordingBroker::default()));
        let failing = Arc::new(Agent::new("a1", "echo"));
        fail_first_task(&failing);
        failing.receive_message(task());
        supervisor.supervise(failing.clone()).await;
        wait_for_state(&failing, AgentState::Error).await;

        let late = Arc::new(Agent::new("a2", "echo"));
        let (actions, registered) = tokio::join!(supervisor.check_once(), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tokio::time::timeout(Duration::from_secs(1), supervisor.supervise(late.clone()))
                .await
                .is_ok()
        });

        assert!(registered, "supervise must not wait for the restart backoff");
        assert_eq!(
            actions,
            vec![SupervisorAction::Restarted {
                agent_id: "a1".to_string(),
                attempt: 1
            }]
        );
        assert_eq!(supervisor.restart_count(late.agent_id()).await, Some(0));
        supervisor.shutdown_all().await;
    }

    struct PublishesTask;

    #[async_trait]
    impl AgentSetup for PublishesTask {
        async fn initialize(&self, agent: &Agent) -> ConductorResult<()> {
            agent.add_capability(CapabilityDescriptor::new("task", "process a task"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn restart_republishes_setup_capabilities_once() {
        let agent = Arc::new(
            Agent::new("a1", "echo")
                .with_setup(Arc::new(PublishesTask))
                .with_poll_interval(Duration::from_millis(10)),
        );
        agent.add_capability(CapabilityDescriptor::new("status", "report status"));
        fail_first_task(&agent);
        agent.receive_message(task());
        let supervisor = Supervisor::new(config(), Arc::new(RecordingBroker::default()));
        supervisor.supervise(agent.clone()).await;
        wait_for_state(&agent, AgentState::Error).await;

        supervisor.check_once().await;
        wait_for_state(&agent, AgentState::Ready).await;

        assert_eq!(agent.capabilities().names(), vec!["status", "task"]);
        supervisor.shutdown_all().await;
    }
}
