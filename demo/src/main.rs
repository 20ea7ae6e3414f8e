//! Conductor multi-agent runtime demo CLI.
//!
//! Runs one or all of the reference scenarios. Each scenario wires real
//! conductor components (orchestrator, broker, hash-chained event log,
//! schema validator) around trivial reference agents.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- sequential-pipeline
//!   cargo run -p demo -- strategic-loop
//!   RUST_LOG=debug cargo run -p demo -- fail-stop

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use conductor_contracts::error::ConductorResult;
use conductor_ref_agents::scenarios::{
    fail_stop, partial_result, priority_mailbox, sequential_pipeline, strategic_loop, unknown_workflow,
};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Conductor: agent lifecycle, priority mailboxes, brokered routing and
/// sequential workflow orchestration.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "Conductor multi-agent runtime demo",
    long_about = "Runs conductor reference scenarios showing workflow execution,\n\
                  partial results, priority mailboxes, fail-stop agents and a\n\
                  catalog-driven workflow through the queued runtime."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every scenario in order.
    RunAll,
    /// Scenario A: echo then upper-case under one correlation id.
    SequentialPipeline,
    /// Scenario B: executing an undefined workflow.
    UnknownWorkflow,
    /// Scenario C: a silent step yields an incomplete outcome.
    PartialResult,
    /// Scenario D: mailbox drains by priority.
    PriorityMailbox,
    /// Scenario E: a failing handler halts its agent.
    FailStop,
    /// The built-in catalog's full strategic loop, queued and parallel.
    StrategicLoop,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match cli.command {
        Command::RunAll => run_all().await,
        Command::SequentialPipeline => sequential_pipeline::run_scenario().await,
        Command::UnknownWorkflow => unknown_workflow::run_scenario().await,
        Command::PartialResult => partial_result::run_scenario().await,
        Command::PriorityMailbox => priority_mailbox::run_scenario().await,
        Command::FailStop => fail_stop::run_scenario().await,
        Command::StrategicLoop => strategic_loop::run_scenario().await,
    };

    match result {
        Ok(()) => println!("All selected scenarios completed successfully."),
        Err(e) => {
            error!(error = %e, "demo failed");
            eprintln!("Demo error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_all() -> ConductorResult<()> {
    sequential_pipeline::run_scenario().await?;
    unknown_workflow::run_scenario().await?;
    partial_result::run_scenario().await?;
    priority_mailbox::run_scenario().await?;
    fail_stop::run_scenario().await?;
    strategic_loop::run_scenario().await
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("Conductor Multi-Agent Runtime");
    println!("=============================");
    println!();
    println!("Per workflow step:");
    println!("  [1] Resolve the step to a registered agent (id first, then type)");
    println!("  [2] Dispatch a workflow_task carrying the execution's correlation id");
    println!("  [3] Append the reply to the hash-chained event log");
    println!("  [4] The reply payload becomes the next step's input");
    println!();
}
