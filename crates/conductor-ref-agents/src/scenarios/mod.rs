//! Runnable scenarios.
//!
//! Each scenario wires real conductor components (orchestrator or runtime,
//! hash-chained event log, schema validator, reference agents) and exposes
//! two entry points: `run()` returns a report the tests inspect, and
//! `run_scenario()` prints a walk-through for the demo CLI.

use std::sync::Arc;

use conductor_audit::HashChainedEventLog;
use conductor_contracts::{error::ConductorResult, message::Message};
use conductor_core::traits::EventLog;

pub mod fail_stop;
pub mod partial_result;
pub mod priority_mailbox;
pub mod sequential_pipeline;
pub mod strategic_loop;
pub mod unknown_workflow;

/// Lets a scenario hand the log to the orchestrator as `Box<dyn EventLog>`
/// and keep a handle for integrity checks afterwards.
pub(crate) struct SharedLog(pub(crate) Arc<HashChainedEventLog>);

impl EventLog for SharedLog {
    fn append(&self, message: &Message) -> ConductorResult<()> {
        self.0.append(message)
    }

    fn entries(&self) -> Vec<Message> {
        self.0.entries()
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn enforce_retention(&self) -> usize {
        self.0.enforce_retention()
    }
}

pub(crate) fn verdict(ok: bool) -> &'static str {
    if ok {
        "VERIFIED"
    } else {
        "FAILED"
    }
}
