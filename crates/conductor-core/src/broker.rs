//! Message routing between agents.
//!
//! ```text
//! send(msg) ──serialize──▶ envelope queue ──run()/route()──▶ resolve target ──▶ Inbox::deliver
//!                                                               │
//!                                                               └─ failure ──▶ dead letters + error log
//! ```
//!
//! Senders name agents, never queues. The broker owns the topology: one named
//! queue per agent type, taken from the policy table.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use conductor_contracts::{
    agent::{AgentId, AgentType},
    error::{ConductorError, ConductorResult},
    message::Message,
    policy::{CommunicationLimits, RetryPolicy},
};

use crate::{
    agent::Agent,
    retry::retry_with_backoff,
    traits::{Broker, Inbox, PolicySource},
};

/// Queue name used when the policy table has no entry for an agent type.
pub fn default_queue_name(agent_type: &AgentType) -> String {
    format!("agent_{}", agent_type)
}

struct Route {
    queue: String,
    agent_type: Option<AgentType>,
    inbox: Arc<dyn Inbox>,
}

/// A message the broker could not deliver, kept for inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    /// `None` when the envelope could not even be decoded.
    pub message_id: Option<String>,
    pub target_agent: Option<String>,
    pub reason: String,
}

// ── InProcessBroker ──────────────────────────────────────────────────────────

/// Broker for agents living in the same process.
///
/// Envelopes travel through an unbounded channel as serialized JSON so the
/// wire shape is exercised on every hop. Priority ordering is applied by the
/// target mailbox, not by the channel.
pub struct InProcessBroker {
    routes: RwLock<HashMap<AgentId, Route>>,
    limits: CommunicationLimits,
    sender: mpsc::UnboundedSender<String>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl InProcessBroker {
    pub fn new(limits: CommunicationLimits) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            routes: RwLock::new(HashMap::new()),
            limits,
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            dead_letters: Mutex::new(Vec::new()),
        }
    }

    /// Make `agent` routable by its id and its type. `queue` comes from the
    /// agent type's policy entry; `agent_<type>` is used when absent.
    /// Returns the queue name.
    pub fn register_agent(&self, agent: &Arc<Agent>, queue: Option<&str>) -> String {
        let queue = queue
            .map(str::to_string)
            .unwrap_or_else(|| default_queue_name(agent.agent_type()));
        info!(
            agent_id = %agent.agent_id(),
            agent_type = %agent.agent_type(),
            queue = %queue,
            "agent routable"
        );
        let inbox: Arc<dyn Inbox> = agent.clone();
        self.routes.write().unwrap_or_else(PoisonError::into_inner).insert(
            agent.agent_id().clone(),
            Route {
                queue: queue.clone(),
                agent_type: Some(agent.agent_type().clone()),
                inbox,
            },
        );
        queue
    }

    /// Route messages addressed to `id` to a non-agent recipient, such as the
    /// orchestrator's reply inbox.
    pub fn register_endpoint(&self, id: impl Into<AgentId>, inbox: Arc<dyn Inbox>) {
        let id = id.into();
        debug!(endpoint = %id, "endpoint routable");
        self.routes.write().unwrap_or_else(PoisonError::into_inner).insert(
            id.clone(),
            Route {
                queue: format!("endpoint_{id}"),
                agent_type: None,
                inbox,
            },
        );
    }

    pub fn unregister(&self, id: &AgentId) {
        self.routes.write().unwrap_or_else(PoisonError::into_inner).remove(id);
    }

    /// The queue a registered recipient listens on.
    pub fn queue_name(&self, id: &AgentId) -> Option<String> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|route| route.queue.clone())
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Resolve the target: exact agent id first, then the first agent (by id)
    /// of that type.
    fn resolve(&self, target: &AgentId) -> Option<Arc<dyn Inbox>> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(route) = routes.get(target) {
            return Some(route.inbox.clone());
        }
        let mut by_type: Vec<(&AgentId, &Route)> = routes
            .iter()
            .filter(|(_, route)| route.agent_type.as_ref().map(AgentType::as_str) == Some(target.as_str()))
            .collect();
        by_type.sort_by(|a, b| a.0.cmp(b.0));
        by_type.first().map(|(_, route)| route.inbox.clone())
    }

    /// Decode one envelope and deliver it to its target's inbox.
    ///
    /// Every failure is logged with the message id and recorded as a dead
    /// letter before it is returned.
    pub fn route(&self, envelope: &str) -> ConductorResult<()> {
        let message: Message = match serde_json::from_str(envelope) {
            Ok(message) => message,
            Err(e) => {
                let err = ConductorError::InvalidMessage {
                    reason: format!("undecodable envelope: {e}"),
                };
                return Err(self.dead_letter(None, None, err));
            }
        };

        let message_id = message.id().to_string();
        let target = message.target_agent().clone();

        if message.is_expired(self.limits.message_ttl_seconds, Utc::now()) {
            let err = ConductorError::MessageExpired {
                message_id: message_id.clone(),
                ttl_seconds: self.limits.message_ttl_seconds,
            };
            return Err(self.dead_letter(Some(message_id), Some(target), err));
        }

        let Some(inbox) = self.resolve(&target) else {
            let err = ConductorError::UnroutableMessage {
                message_id: message_id.clone(),
                target_agent: target.0.clone(),
            };
            return Err(self.dead_letter(Some(message_id), Some(target), err));
        };

        if let Err(e) = inbox.deliver(message) {
            return Err(self.dead_letter(Some(message_id), Some(target), e));
        }
        debug!(message_id = %message_id, target_agent = %target, "message routed");
        Ok(())
    }

    fn dead_letter(
        &self,
        message_id: Option<String>,
        target: Option<AgentId>,
        err: ConductorError,
    ) -> ConductorError {
        error!(
            message_id = message_id.as_deref().unwrap_or("-"),
            target_agent = target.as_ref().map(AgentId::as_str).unwrap_or("-"),
            error = %err,
            "message not delivered"
        );
        self.dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DeadLetter {
                message_id,
                target_agent: target.map(|t| t.0),
                reason: err.to_string(),
            });
        err
    }

    /// Route every envelope currently queued. Returns how many were handled.
    pub async fn drain(&self) -> usize {
        let mut receiver = self.receiver.lock().await;
        let mut handled = 0;
        while let Ok(envelope) = receiver.try_recv() {
            self.route(&envelope).ok();
            handled += 1;
        }
        handled
    }

    /// The routing loop. Runs until the task is aborted.
    pub async fn run(&self) {
        let mut receiver = self.receiver.lock().await;
        while let Some(envelope) = receiver.recv().await {
            // Failures are already logged and dead-lettered.
            self.route(&envelope).ok();
        }
    }
}

#[async_trait]
impl Broker for InProcessBroker {
    async fn send(&self, message: Message) -> ConductorResult<()> {
        let envelope = serde_json::to_string(&message).map_err(|e| ConductorError::InvalidMessage {
            reason: format!("message {} is not serializable: {e}", message.id()),
        })?;

        if envelope.len() > self.limits.max_message_size_bytes {
            return Err(ConductorError::MessageTooLarge {
                message_id: message.id().to_string(),
                size: envelope.len(),
                limit: self.limits.max_message_size_bytes,
            });
        }

        self.sender.send(envelope).map_err(|_| ConductorError::DeliveryFailed {
            message_id: message.id().to_string(),
            reason: "broker channel closed".to_string(),
        })?;
        debug!(
            message_id = %message.id(),
            target_agent = %message.target_agent(),
            priority = message.priority().value(),
            "message accepted"
        );
        Ok(())
    }
}

// ── RetryingBroker ───────────────────────────────────────────────────────────

/// Retries transient send failures per the target agent type's retry policy.
pub struct RetryingBroker {
    inner: Arc<dyn Broker>,
    policies: Arc<dyn PolicySource>,
    agent_types: RwLock<HashMap<AgentId, String>>,
}

impl RetryingBroker {
    pub fn new(inner: Arc<dyn Broker>, policies: Arc<dyn PolicySource>) -> Self {
        Self {
            inner,
            policies,
            agent_types: RwLock::new(HashMap::new()),
        }
    }

    /// Record the type of an agent id so its retry policy can be found.
    pub fn track(&self, agent_id: AgentId, agent_type: &AgentType) {
        self.agent_types
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent_id, agent_type.0.clone());
    }

    fn retry_policy(&self, target: &AgentId) -> RetryPolicy {
        let agent_type = self
            .agent_types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
            .unwrap_or_else(|| target.0.clone());
        self.policies
            .agent_policy(&agent_type)
            .map(|policy| policy.retry_policy.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for RetryingBroker {
    async fn send(&self, message: Message) -> ConductorResult<()> {
        let policy = self.retry_policy(message.target_agent());
        let scope = format!("send {}", message.id());
        retry_with_backoff(&policy, &scope, || self.inner.send(message.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use serde_json::json;

    use conductor_contracts::{
        message::{payload_from_json, Message, Priority},
        policy::{AgentPolicy, RetryPolicy},
    };

    use super::*;
    use crate::testing::{RecordingInbox, StaticPolicies};

    fn msg(target: &str) -> Message {
        Message::new("tester", target, "ping", payload_from_json(json!({ "n": 1 })).unwrap())
    }

    // ── Routing ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn routes_by_agent_id() {
        let broker = InProcessBroker::new(CommunicationLimits::default());
        let agent = Arc::new(Agent::new("a1", "echo"));
        broker.register_agent(&agent, Some("agent_echo"));

        broker.send(msg("a1")).await.unwrap();
        assert_eq!(broker.drain().await, 1);

        assert_eq!(agent.mailbox_len(), 1);
        assert!(broker.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn routes_by_agent_type() {
        let broker = InProcessBroker::new(CommunicationLimits::default());
        let agent = Arc::new(Agent::new("mv-1", "market_validation"));
        broker.register_agent(&agent, None);

        broker.send(msg("market_validation")).await.unwrap();
        broker.drain().await;

        assert_eq!(agent.mailbox_len(), 1);
    }

    #[tokio::test]
    async fn unknown_target_is_dead_lettered() {
        let broker = InProcessBroker::new(CommunicationLimits::default());
        let lost = msg("ghost");
        let lost_id = lost.id().to_string();

        // Fire-and-forget: the sender does not see the routing failure.
        broker.send(lost).await.unwrap();
        broker.drain().await;

        let dead = broker.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message_id.as_deref(), Some(lost_id.as_str()));
        assert_eq!(dead[0].target_agent.as_deref(), Some("ghost"));
    }

    #[test]
    fn route_reports_unroutable_error() {
        let broker = InProcessBroker::new(CommunicationLimits::default());
        let envelope = serde_json::to_string(&msg("ghost")).unwrap();

        assert!(matches!(
            broker.route(&envelope),
            Err(ConductorError::UnroutableMessage { .. })
        ));
    }

    #[test]
    fn expired_messages_are_not_delivered() {
        let broker = InProcessBroker::new(CommunicationLimits::default());
        let inbox = Arc::new(RecordingInbox::default());
        broker.register_endpoint("a1", inbox.clone());

        let mut wire = serde_json::to_value(msg("a1")).unwrap();
        wire["timestamp"] = json!("2000-01-01T00:00:00Z");

        let result = broker.route(&wire.to_string());

        assert!(matches!(result, Err(ConductorError::MessageExpired { ttl_seconds: 3600, .. })));
        assert!(inbox.received().is_empty());
        assert_eq!(broker.dead_letters().len(), 1);
    }

    #[test]
    fn garbage_envelope_is_dead_lettered() {
        let broker = InProcessBroker::new(CommunicationLimits::default());
        assert!(broker.route("{not json").is_err());
        assert_eq!(broker.dead_letters()[0].message_id, None);
    }

    #[tokio::test]
    async fn oversized_messages_are_rejected_at_send() {
        let limits = CommunicationLimits {
            max_message_size_bytes: 64,
            ..CommunicationLimits::default()
        };
        let broker = InProcessBroker::new(limits);
        let big = Message::new("a", "b", "blob", payload_from_json(json!({ "data": "x".repeat(200) })).unwrap());

        assert!(matches!(
            broker.send(big).await,
            Err(ConductorError::MessageTooLarge { limit: 64, .. })
        ));
    }

    #[tokio::test]
    async fn priority_survives_the_wire() {
        let broker = InProcessBroker::new(CommunicationLimits::default());
        let inbox = Arc::new(RecordingInbox::default());
        broker.register_endpoint("a1", inbox.clone());

        broker.send(msg("a1").with_priority(Priority::CRITICAL)).await.unwrap();
        broker.drain().await;

        assert_eq!(inbox.received()[0].priority(), Priority::CRITICAL);
    }

    #[test]
    fn queue_names_follow_policy_or_fallback() {
        let broker = InProcessBroker::new(CommunicationLimits::default());
        let a = Arc::new(Agent::new("a1", "echo"));
        let b = Arc::new(Agent::new("pa-1", "product_architect"));

        broker.register_agent(&a, None);
        broker.register_agent(&b, Some("agent_product_architect"));

        assert_eq!(broker.queue_name(&AgentId::new("a1")).as_deref(), Some("agent_echo"));
        assert_eq!(
            broker.queue_name(&AgentId::new("pa-1")).as_deref(),
            Some("agent_product_architect")
        );
        assert!(broker.queue_name(&AgentId::new("zz")).is_none());
    }

    // ── RetryingBroker ───────────────────────────────────────────────────────

    /// Fails with a transient error `failures` times, then accepts.
    struct FlakyBroker {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Broker for FlakyBroker {
        async fn send(&self, message: Message) -> ConductorResult<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(ConductorError::DeliveryFailed {
                    message_id: message.id().to_string(),
                    reason: "connection reset".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn policies_with_retries(max_retries: u32) -> Arc<StaticPolicies> {
        let mut policies = StaticPolicies::default();
        policies.agents.insert(
            "echo".to_string(),
            AgentPolicy {
                id: "echo".to_string(),
                name: "Echo".to_string(),
                description: String::new(),
                queue: "agent_echo".to_string(),
                timeout_seconds: 30,
                retry_policy: RetryPolicy {
                    max_retries,
                    retry_delay_seconds: 1,
                    max_delay_seconds: 600,
                },
                capabilities: Vec::new(),
            },
        );
        Arc::new(policies)
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_broker_recovers_from_transient_failures() {
        let flaky = Arc::new(FlakyBroker {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let broker = RetryingBroker::new(flaky.clone(), policies_with_retries(3));
        broker.track(AgentId::new("a1"), &AgentType::new("echo"));

        assert!(broker.send(msg("a1")).await.is_ok());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_broker_gives_up_after_max_retries() {
        let flaky = Arc::new(FlakyBroker {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let broker = RetryingBroker::new(flaky.clone(), policies_with_retries(2));
        broker.track(AgentId::new("a1"), &AgentType::new("echo"));

        assert!(matches!(
            broker.send(msg("a1")).await,
            Err(ConductorError::DeliveryFailed { .. })
        ));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }
}
