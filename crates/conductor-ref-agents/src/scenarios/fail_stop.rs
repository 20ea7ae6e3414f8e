//! Scenario E: a failing handler halts its agent.
//!
//! Two tasks are queued. The first one fails, the agent enters `ERROR` and
//! its loop ends; the second task is never dequeued.

use std::sync::Arc;

use serde_json::json;

use conductor_contracts::{
    agent::AgentState,
    error::{ConductorError, ConductorResult},
    message::{payload_from_json, Message, Priority},
    policy::CommunicationLimits,
};
use conductor_core::{orchestrator::WORKFLOW_TASK, Agent, InProcessBroker};

use crate::agents::failing_agent;

#[derive(Debug)]
pub struct FailStopReport {
    pub loop_error: Option<ConductorError>,
    pub final_state: AgentState,
    pub still_queued: usize,
}

fn task(label: &str, priority: Priority) -> ConductorResult<Message> {
    Ok(
        Message::new("scenario", "fragile", WORKFLOW_TASK, payload_from_json(json!({ "label": label }))?)
            .with_priority(priority),
    )
}

pub async fn run() -> ConductorResult<FailStopReport> {
    let agent: Arc<Agent> = Arc::new(failing_agent("fragile", "upstream data is corrupt"));
    agent.receive_message(task("first", Priority::HIGH)?);
    agent.receive_message(task("second", Priority::LOW)?);

    let broker = Arc::new(InProcessBroker::new(CommunicationLimits::default()));
    let loop_error = agent.clone().start(broker).await.err();

    Ok(FailStopReport {
        loop_error,
        final_state: agent.state(),
        still_queued: agent.mailbox_len(),
    })
}

pub async fn run_scenario() -> ConductorResult<()> {
    println!("=== Scenario E: Fail-Stop Agent ===");
    println!();

    let report = run().await?;

    match &report.loop_error {
        Some(e) => println!("  Loop ended with:   {}", e),
        None => println!("  UNEXPECTED: loop ended cleanly"),
    }
    println!("  Final state:       {}", report.final_state.as_str());
    println!("  Still queued:      {}", report.still_queued);
    println!();
    println!("  Scenario E complete.");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_message_stays_queued() {
        let report = run().await.unwrap();

        assert!(matches!(report.loop_error, Some(ConductorError::HandlerFailed { .. })));
        assert_eq!(report.final_state, AgentState::Error);
        assert_eq!(report.still_queued, 1);
    }
}
