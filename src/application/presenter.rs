use crate::domain::operation::RevertReason;
use crate::domain::workflow::{FailureReason, Stage, WorkflowState};
use serde::Serialize;
use std::fmt;

/// What a user interface shows for a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum DisplayStatus {
    Processing,
    Success,
    Error(String),
}

impl fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayStatus::Processing => f.write_str("processing"),
            DisplayStatus::Success => f.write_str("success"),
            DisplayStatus::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Stateless mapping from workflow states to display statuses.
pub struct WorkflowPresenter;

impl WorkflowPresenter {
    pub fn present(state: &WorkflowState) -> DisplayStatus {
        match state {
            WorkflowState::Completed => DisplayStatus::Success,
            WorkflowState::Failed { stage, reason } => {
                DisplayStatus::Error(format!("{}: {}", step(*stage), explain(reason)))
            }
            _ => DisplayStatus::Processing,
        }
    }
}

fn step(stage: Stage) -> &'static str {
    match stage {
        Stage::Idle => "Purchase could not start",
        Stage::Authorizing => "Spend approval failed",
        Stage::AwaitingEligibility => "Eligibility check failed",
        Stage::Purchasing => "Purchase failed",
    }
}

fn explain(reason: &FailureReason) -> String {
    match reason {
        FailureReason::LedgerRejection {
            revert: RevertReason::InsufficientBalance { .. },
        } => "not enough funds in the payment account".to_string(),
        FailureReason::LedgerRejection {
            revert: RevertReason::InsufficientAllowance { .. },
        } => "the asset program is not approved to spend enough funds".to_string(),
        FailureReason::LedgerRejection {
            revert: RevertReason::NotEligible,
        }
        | FailureReason::NotEligible => {
            "the account is not whitelisted for this asset".to_string()
        }
        FailureReason::Cancelled => "cancelled".to_string(),
        other => other.to_string(),
    }
}
