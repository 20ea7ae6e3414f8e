//! Scenario D: the mailbox drains by priority, not arrival.
//!
//! Three tasks arrive with priorities 3, 9 and 5 before the agent's loop
//! starts. The loop processes them 9, 5, 3.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use conductor_contracts::{
    error::ConductorResult,
    message::{payload_from_json, Message, Priority},
    policy::CommunicationLimits,
};
use conductor_core::{agent::handler_fn, Agent, InProcessBroker};

/// Priorities in arrival order.
pub const ARRIVALS: [i64; 3] = [3, 9, 5];

#[derive(Debug)]
pub struct PriorityReport {
    pub arrival_order: Vec<u8>,
    pub processing_order: Vec<u8>,
}

pub async fn run() -> ConductorResult<PriorityReport> {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let agent = Arc::new(Agent::new("worker", "recorder"));
    agent.register_handler(
        "task",
        handler_fn(move |msg: Message, _ctx| {
            let seen_tx = seen_tx.clone();
            async move {
                seen_tx.send(msg.priority().value()).ok();
                Ok(None)
            }
        }),
    );

    let mut arrival_order = Vec::with_capacity(ARRIVALS.len());
    for value in ARRIVALS {
        let priority = Priority::new(value)?;
        arrival_order.push(priority.value());
        agent.receive_message(
            Message::new("scenario", "worker", "task", payload_from_json(json!({ "priority": value }))?)
                .with_priority(priority),
        );
    }

    let broker = Arc::new(InProcessBroker::new(CommunicationLimits::default()));
    let observer = async {
        let mut order = Vec::with_capacity(ARRIVALS.len());
        while order.len() < ARRIVALS.len() {
            match seen_rx.recv().await {
                Some(value) => order.push(value),
                None => break,
            }
        }
        agent.shutdown();
        order
    };
    let (loop_result, processing_order) = tokio::join!(agent.clone().start(broker), observer);
    loop_result?;

    Ok(PriorityReport {
        arrival_order,
        processing_order,
    })
}

pub async fn run_scenario() -> ConductorResult<()> {
    println!("=== Scenario D: Priority Mailbox ===");
    println!();

    let report = run().await?;

    println!("  Arrival order:     {:?}", report.arrival_order);
    println!("  Processing order:  {:?}", report.processing_order);
    println!();
    println!("  Scenario D complete.");
    println!();
    Ok(())
}
