//! Catalog-driven scenario: the full strategic loop.
//!
//! Loads the built-in policy catalog, switches the multi-agent subsystem and
//! parallel workflows on, starts one stand-in agent per catalog type under a
//! queued runtime and runs `full_strategic_loop`. Steps travel through the
//! broker; business intelligence and user experience run as one parallel
//! stage. Every payload is checked against the agents' capability schemas.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use serde_json::json;
use tracing::info;

use conductor_audit::HashChainedEventLog;
use conductor_contracts::{
    agent::AgentState,
    error::ConductorResult,
    message::payload_from_json,
    policy::FeatureFlags,
    workflow::WorkflowOutcome,
};
use conductor_core::{traits::EventLog, Runtime};
use conductor_policy::TomlPolicyCatalog;
use conductor_verify::SchemaValidator;

use super::{verdict, SharedLog};
use crate::agents::catalog_agents;

pub const WORKFLOW_ID: &str = "full_strategic_loop";

const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct StrategicLoopReport {
    pub outcome: WorkflowOutcome,
    pub event_count: usize,
    pub chain_verified: bool,
    pub agent_status: BTreeMap<String, AgentState>,
    pub dead_letters: usize,
}

/// The built-in catalog with the subsystem and parallel stages enabled.
pub fn enabled_catalog() -> ConductorResult<TomlPolicyCatalog> {
    TomlPolicyCatalog::builtin()?
        .with_feature(FeatureFlags::MULTI_AGENT_SYSTEM, true)?
        .with_feature(FeatureFlags::PARALLEL_WORKFLOWS, true)
}

pub async fn run() -> ConductorResult<StrategicLoopReport> {
    let catalog = enabled_catalog()?;
    let agents = catalog_agents(&catalog);

    let retention = catalog.document().communication.event_retention_seconds;
    let log = Arc::new(HashChainedEventLog::new().with_retention_seconds(retention));
    let runtime = Runtime::queued(
        Arc::new(catalog),
        Box::new(SharedLog(log.clone())),
        Some(Arc::new(SchemaValidator::new())),
        REPLY_TIMEOUT,
    )?;
    for agent in agents {
        runtime.spawn_agent(agent).await;
    }

    let input = payload_from_json(json!({
        "hypothesis": "teams adopt weekly planning when reminders are contextual"
    }))?;
    let result = runtime.execute_workflow(WORKFLOW_ID, input).await;

    let agent_status = runtime.orchestrator().get_agent_status();
    let dead_letters = runtime.router().dead_letters().len();
    let alerts = runtime.check_alerts();
    let purged = runtime.enforce_retention();
    info!(alerts = alerts.len(), purged, "strategic loop finished");
    runtime.shutdown().await;

    Ok(StrategicLoopReport {
        outcome: result?,
        event_count: log.len(),
        chain_verified: log.verify_integrity(),
        agent_status,
        dead_letters,
    })
}

pub async fn run_scenario() -> ConductorResult<()> {
    println!("=== Catalog Scenario: Full Strategic Loop ===");
    println!();
    println!("  Catalog:   built-in (multi-agent + parallel workflows enabled)");
    println!("  Dispatch:  queued through the in-process broker");
    println!();

    let report = run().await?;
    let outcome = &report.outcome;

    println!("  Steps completed:        {}/{}", outcome.steps_completed, outcome.steps_declared);
    println!("  Status:                 {:?}", outcome.status);
    let mut sections: Vec<&String> = outcome.payload.keys().collect();
    sections.sort();
    println!("  Payload sections:       {:?}", sections);
    println!("  Events logged:          {}", report.event_count);
    println!("  Event chain integrity:  {}", verdict(report.chain_verified));
    println!("  Dead letters:           {}", report.dead_letters);
    println!();
    println!("  Agent states at completion:");
    for (agent_id, state) in &report.agent_status {
        println!("    {:<28} {}", agent_id, state.as_str());
    }
    println!();
    println!("  Catalog scenario complete.");
    println!();
    Ok(())
}
