//! # conductor-core
//!
//! The runtime of the conductor multi-agent system.
//!
//! This crate provides:
//! - The pluggable seams (`Handler`, `AgentSetup`, `Broker`, `Inbox`,
//!   `Dispatcher`, `EventLog`, `PolicySource`, `PayloadValidator`)
//! - The `Agent` runtime with its private priority mailbox
//! - The `InProcessBroker` and the `RetryingBroker` decorator
//! - The `Orchestrator` with direct and queued dispatch backends
//! - The `Supervisor`, `Metrics` and the `Runtime` composition root
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conductor_core::{Agent, Orchestrator, agent::handler_fn};
//!
//! let orchestrator = Orchestrator::new(Box::new(event_log));
//! let agent = Arc::new(Agent::new("a1", "echo"));
//! agent.register_handler("workflow_task", handler_fn(|msg, _ctx| async move {
//!     Ok(Some(msg.reply("workflow_result", msg.payload().clone())))
//! }));
//! orchestrator.register_agent(agent);
//! orchestrator.define_workflow("w1", vec!["a1".into()]);
//! let outcome = orchestrator.execute_workflow("w1", payload).await?;
//! ```

pub mod agent;
pub mod broker;
pub mod dispatch;
mod mailbox;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod runtime;
pub mod supervisor;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{handler_fn, Agent, AgentContext};
pub use broker::{InProcessBroker, RetryingBroker};
pub use dispatch::{DirectDispatcher, QueuedDispatcher};
pub use orchestrator::{MergePolicy, Orchestrator};
pub use runtime::{DispatchMode, Runtime};
pub use supervisor::{Supervisor, SupervisorConfig};
