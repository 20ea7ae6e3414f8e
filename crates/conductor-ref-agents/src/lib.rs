//! # conductor-ref-agents
//!
//! Reference agents and runnable scenarios for the conductor runtime.
//!
//! The scenarios:
//!
//! - **A** Sequential pipeline: echo then upper-case, one correlation id.
//! - **B** Unknown workflow: execution fails loudly.
//! - **C** Partial result: a silent step yields an incomplete outcome that
//!   still carries the last good payload.
//! - **D** Priority mailbox: arrival 3, 9, 5 is processed 9, 5, 3.
//! - **E** Fail-stop: a failing handler halts its agent with work still queued.
//! - **Strategic loop**: the built-in catalog driven end to end through the
//!   queued runtime with a parallel stage and schema validation.
//!
//! Agent logic is trivial and deterministic. No external service is called.

pub mod agents;
pub mod scenarios;
