//! Scenario B: executing a workflow that was never defined fails loudly.

use std::sync::Arc;

use conductor_audit::HashChainedEventLog;
use conductor_contracts::{
    error::{ConductorError, ConductorResult},
    message::Payload,
};
use conductor_core::{traits::EventLog, Orchestrator};

use super::SharedLog;

/// The error returned for `missing_workflow`, and whether anything was
/// logged on the way.
#[derive(Debug)]
pub struct UnknownWorkflowReport {
    pub error: Option<ConductorError>,
    pub event_count: usize,
}

pub async fn run() -> ConductorResult<UnknownWorkflowReport> {
    let log = Arc::new(HashChainedEventLog::new());
    let orchestrator = Orchestrator::new(Box::new(SharedLog(log.clone())));

    let error = orchestrator
        .execute_workflow("missing_workflow", Payload::new())
        .await
        .err();

    Ok(UnknownWorkflowReport {
        error,
        event_count: log.len(),
    })
}

pub async fn run_scenario() -> ConductorResult<()> {
    println!("=== Scenario B: Unknown Workflow ===");
    println!();

    let report = run().await?;
    match &report.error {
        Some(e) => println!("  Rejected:        {}", e),
        None => println!("  UNEXPECTED: missing workflow executed"),
    }
    println!("  Events logged:   {}", report.event_count);
    println!();
    println!("  Scenario B complete.");
    println!();
    Ok(())
}
