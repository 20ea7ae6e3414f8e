//! Scenario A: a two-step sequential workflow.
//!
//! `a1` echoes, `a2` upper-cases `text`. The final payload is a2's output and
//! both replies land in the event log under one correlation id.

use std::sync::Arc;

use serde_json::json;

use conductor_audit::HashChainedEventLog;
use conductor_contracts::{
    error::ConductorResult,
    message::{payload_from_json, Payload},
    workflow::WorkflowOutcome,
};
use conductor_core::{traits::EventLog, Orchestrator};

use super::{verdict, SharedLog};
use crate::agents::{echo_agent, uppercase_agent};

#[derive(Debug)]
pub struct PipelineReport {
    pub outcome: WorkflowOutcome,
    pub event_count: usize,
    pub shared_correlation: bool,
    pub chain_verified: bool,
}

impl PipelineReport {
    pub fn payload(&self) -> &Payload {
        &self.outcome.payload
    }
}

pub async fn run() -> ConductorResult<PipelineReport> {
    let log = Arc::new(HashChainedEventLog::new());
    let orchestrator = Orchestrator::new(Box::new(SharedLog(log.clone())));
    orchestrator.register_agent(Arc::new(echo_agent("a1")));
    orchestrator.register_agent(Arc::new(uppercase_agent("a2")));
    orchestrator.define_workflow("w1", vec!["a1".to_string(), "a2".to_string()]);

    let outcome = orchestrator
        .execute_workflow("w1", payload_from_json(json!({ "text": "hi" }))?)
        .await?;

    let entries = log.entries();
    let shared_correlation = entries
        .iter()
        .all(|m| m.correlation_id() == Some(outcome.correlation_id));

    Ok(PipelineReport {
        outcome,
        event_count: entries.len(),
        shared_correlation,
        chain_verified: log.verify_integrity(),
    })
}

pub async fn run_scenario() -> ConductorResult<()> {
    println!("=== Scenario A: Sequential Pipeline ===");
    println!();
    println!("  Workflow w1 = [a1 (echo), a2 (uppercase)]");
    println!("  Input:      {{\"text\": \"hi\"}}");
    println!();

    let report = run().await?;

    println!("  Steps completed:        {}/{}", report.outcome.steps_completed, report.outcome.steps_declared);
    println!("  Final payload:          {}", serde_json::Value::Object(report.payload().clone()));
    println!("  Events logged:          {}", report.event_count);
    println!("  Shared correlation id:  {}", report.shared_correlation);
    println!("  Event chain integrity:  {}", verdict(report.chain_verified));
    println!();
    println!("  Scenario A complete.");
    println!();
    Ok(())
}
