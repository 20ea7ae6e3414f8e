//! Workflow execution results.
//!
//! `execute_workflow` always hands back the best payload it reached. The
//! `WorkflowStatus` tells the caller whether that payload is the product of
//! every declared step or only of a prefix of them.

use serde::{Deserialize, Serialize};

use crate::message::{CorrelationId, Payload};

/// Whether every declared step of a workflow produced a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    /// Every step responded.
    Completed,

    /// Execution stopped early. The outcome payload is the output of the last
    /// step that responded, or the initial data if none did.
    Incomplete {
        /// Zero-based position in `agent_sequence` of the step that failed.
        failed_step: usize,
        /// The step identifier (agent id or agent type) that failed.
        agent: String,
        /// Human-readable explanation, also written to the log.
        reason: String,
    },
}

/// The result of one `execute_workflow` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub workflow_id: String,
    /// Shared by every message of this execution.
    pub correlation_id: CorrelationId,
    /// The final (or last good) payload.
    pub payload: Payload,
    pub steps_declared: usize,
    pub steps_completed: usize,
    pub status: WorkflowStatus,
}

impl WorkflowOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self.status, WorkflowStatus::Completed)
    }
}
