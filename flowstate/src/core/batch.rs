//! Batch request and result types.
//!
//! Requests are validated as a whole before any operation runs, so a
//! malformed entry can never leave an atomic batch half-applied.

use serde::{Deserialize, Serialize};

use crate::core::task::{TaskStatus, validate_id};
use crate::error::{FlowError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BatchOp {
    Start {
        #[serde(rename = "taskId")]
        task_id: String,
    },
    Done {
        #[serde(rename = "taskId")]
        task_id: String,
        #[serde(default)]
        minutes: Option<u32>,
    },
    Fail {
        #[serde(rename = "taskId")]
        task_id: String,
        reason: String,
    },
}

impl BatchOp {
    pub fn task_id(&self) -> &str {
        match self {
            BatchOp::Start { task_id }
            | BatchOp::Done { task_id, .. }
            | BatchOp::Fail { task_id, .. } => task_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BatchOp::Start { .. } => "start",
            BatchOp::Done { .. } => "done",
            BatchOp::Fail { .. } => "fail",
        }
    }
}

/// Reject the whole batch if any entry is malformed.
pub fn validate_batch(ops: &[BatchOp]) -> Result<()> {
    if ops.is_empty() {
        return Err(FlowError::validation("batch must contain at least one operation"));
    }
    let mut problems = Vec::new();
    for (position, op) in ops.iter().enumerate() {
        if let Err(err) = validate_id(op.task_id()) {
            problems.push(format!("#{position} ({}): {err}", op.kind()));
        }
        if let BatchOp::Fail { reason, .. } = op
            && reason.trim().is_empty()
        {
            problems.push(format!("#{position} (fail): reason must not be empty"));
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(FlowError::validation(format!(
            "invalid batch:\n- {}",
            problems.join("\n- ")
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OpOutcome {
    /// Applied and kept.
    Applied { status: TaskStatus },
    /// Applied, then undone because a later operation failed.
    RolledBack,
    Failed { code: String, error: String },
    /// Never attempted because an earlier operation failed.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpResult {
    pub position: usize,
    pub kind: String,
    pub task_id: String,
    #[serde(flatten)]
    pub outcome: OpOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub atomic: bool,
    /// False only when an atomic batch was rolled back.
    pub committed: bool,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<OpResult>,
}

impl BatchOutcome {
    pub fn from_results(atomic: bool, results: Vec<OpResult>) -> Self {
        let succeeded = results
            .iter()
            .filter(|r| matches!(r.outcome, OpOutcome::Applied { .. }))
            .count();
        let failed = results
            .iter()
            .filter(|r| matches!(r.outcome, OpOutcome::Failed { .. }))
            .count();
        let committed = !(atomic && failed > 0);
        Self {
            atomic,
            committed,
            succeeded,
            failed,
            results,
        }
    }
}
