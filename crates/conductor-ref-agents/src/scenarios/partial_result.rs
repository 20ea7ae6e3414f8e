//! Scenario C: a step that produces no response.
//!
//! `a2` handles its task but never answers. The workflow stops there and the
//! outcome carries a1's output, marked incomplete.

use std::sync::Arc;

use serde_json::json;

use conductor_audit::HashChainedEventLog;
use conductor_contracts::{
    error::ConductorResult,
    message::payload_from_json,
    workflow::{WorkflowOutcome, WorkflowStatus},
};
use conductor_core::{traits::EventLog, Orchestrator};

use super::SharedLog;
use crate::agents::{echo_agent, silent_agent};

#[derive(Debug)]
pub struct PartialResultReport {
    pub outcome: WorkflowOutcome,
    pub event_count: usize,
}

pub async fn run() -> ConductorResult<PartialResultReport> {
    let log = Arc::new(HashChainedEventLog::new());
    let orchestrator = Orchestrator::new(Box::new(SharedLog(log.clone())));
    orchestrator.register_agent(Arc::new(echo_agent("a1")));
    orchestrator.register_agent(Arc::new(silent_agent("a2")));
    orchestrator.define_workflow("w1", vec!["a1".to_string(), "a2".to_string()]);

    let outcome = orchestrator
        .execute_workflow("w1", payload_from_json(json!({ "text": "hi" }))?)
        .await?;

    Ok(PartialResultReport {
        outcome,
        event_count: log.len(),
    })
}

pub async fn run_scenario() -> ConductorResult<()> {
    println!("=== Scenario C: Partial Result ===");
    println!();
    println!("  Workflow w1 = [a1 (echo), a2 (silent)]");
    println!();

    let report = run().await?;
    let outcome = &report.outcome;

    println!("  Steps completed:   {}/{}", outcome.steps_completed, outcome.steps_declared);
    match &outcome.status {
        WorkflowStatus::Completed => println!("  UNEXPECTED: workflow reported complete"),
        WorkflowStatus::Incomplete { failed_step, agent, reason } => {
            println!("  Stopped at step:   {} ({})", failed_step, agent);
            println!("  Reason:            {}", reason);
        }
    }
    println!("  Returned payload:  {}", serde_json::Value::Object(outcome.payload.clone()));
    println!("  Events logged:     {}", report.event_count);
    println!();
    println!("  Scenario C complete.");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_last_good_payload_marked_incomplete() {
        let report = run().await.unwrap();
        let outcome = report.outcome;

        assert!(!outcome.is_complete());
        assert_eq!(outcome.steps_declared, 2);
        assert_eq!(outcome.steps_completed, 1);
        assert_eq!(outcome.payload["text"], json!("hi"));
        match outcome.status {
            WorkflowStatus::Incomplete { failed_step, agent, .. } => {
                assert_eq!(failed_step, 1);
                assert_eq!(agent, "a2");
            }
            other => panic!("expected Incomplete, got {:?}", other),
        }
        assert_eq!(report.event_count, 1);
    }
}
