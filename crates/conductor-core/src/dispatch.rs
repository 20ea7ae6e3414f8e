//! Dispatcher backends: how a workflow step reaches an agent.
//!
//! - `DirectDispatcher` calls the agent's processing step in-process on a
//!   task of its own, so a panicking handler cannot unwind into the caller.
//!   No broker, no mailbox.
//! - `QueuedDispatcher` sends the step through the broker like any other
//!   message and waits for the reply that carries the same correlation id
//!   back from the target agent.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, error, warn};

use conductor_contracts::{
    agent::AgentId,
    error::{ConductorError, ConductorResult},
    message::{CorrelationId, Message},
};

use crate::{
    agent::Agent,
    traits::{Broker, Dispatcher, Inbox},
};

/// In-process backend: the step runs on a worker task and the caller awaits
/// it. A panic in the handler is reported as `WorkerLost` and leaves the agent
/// in `ERROR`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectDispatcher;

#[async_trait]
impl Dispatcher for DirectDispatcher {
    async fn dispatch(&self, agent: &Arc<Agent>, message: Message) -> ConductorResult<Option<Message>> {
        let message_id = message.id();
        let mut worker = AbortOnDrop({
            let agent = Arc::clone(agent);
            tokio::spawn(async move { agent.process_message(message).await })
        });

        match (&mut worker.0).await {
            Ok(result) => result,
            Err(join_error) => {
                agent.enter_error();
                error!(
                    agent_id = %agent.agent_id(),
                    message_id = %message_id,
                    error = %join_error,
                    "worker lost during direct dispatch"
                );
                Err(ConductorError::WorkerLost {
                    agent_id: agent.agent_id().0.clone(),
                    message_id: message_id.to_string(),
                })
            }
        }
    }
}

/// Dropping the dispatch (a step deadline) cancels the worker with it.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

type ReplyKey = (CorrelationId, AgentId);

/// Queued backend: request/response over the broker.
///
/// Register it with the broker as the endpoint named by the requests'
/// `source_agent` (the orchestrator) so replies find their way back. A reply
/// is matched on `(correlation_id, replying agent)`; a step that never replies
/// surfaces as `DeadlineExceeded` after `reply_timeout`.
pub struct QueuedDispatcher {
    broker: Arc<dyn Broker>,
    pending: Mutex<HashMap<ReplyKey, oneshot::Sender<Message>>>,
    reply_timeout: Duration,
}

impl QueuedDispatcher {
    pub fn new(broker: Arc<dyn Broker>, reply_timeout: Duration) -> Self {
        Self {
            broker,
            pending: Mutex::new(HashMap::new()),
            reply_timeout,
        }
    }

    /// Requests still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn forget(&self, key: &ReplyKey) {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
    }
}

impl Inbox for QueuedDispatcher {
    fn deliver(&self, message: Message) -> ConductorResult<()> {
        let Some(correlation_id) = message.correlation_id() else {
            return Err(ConductorError::InvalidMessage {
                reason: format!("reply {} carries no correlation id", message.id()),
            });
        };
        let key = (correlation_id, message.source_agent().clone());
        let waiter = self.pending.lock().unwrap_or_else(PoisonError::into_inner).remove(&key);

        match waiter {
            Some(tx) => {
                debug!(
                    message_id = %message.id(),
                    correlation_id = %correlation_id,
                    source_agent = %message.source_agent(),
                    "reply matched"
                );
                // The waiter may have timed out in the meantime; the reply is then moot.
                tx.send(message).ok();
                Ok(())
            }
            None => Err(ConductorError::DeliveryFailed {
                message_id: message.id().to_string(),
                reason: format!("no request from '{}' awaits this reply", message.source_agent()),
            }),
        }
    }
}

#[async_trait]
impl Dispatcher for QueuedDispatcher {
    async fn dispatch(&self, agent: &Arc<Agent>, message: Message) -> ConductorResult<Option<Message>> {
        let Some(correlation_id) = message.correlation_id() else {
            return Err(ConductorError::InvalidMessage {
                reason: format!("queued request {} carries no correlation id", message.id()),
            });
        };
        let key = (correlation_id, agent.agent_id().clone());
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), tx);

        if let Err(e) = self.broker.send(message).await {
            self.forget(&key);
            return Err(e);
        }

        match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                self.forget(&key);
                warn!(
                    agent_id = %agent.agent_id(),
                    correlation_id = %correlation_id,
                    timeout_ms = self.reply_timeout.as_millis() as u64,
                    "no reply before deadline"
                );
                Err(ConductorError::DeadlineExceeded {
                    scope: format!("reply from '{}'", agent.agent_id()),
                    timeout_ms: self.reply_timeout.as_millis() as u64,
                })
            }
        }
    }
}
