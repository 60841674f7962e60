use super::address::{Address, TxHash};
use super::amount::{Quantity, TokenAmount};
use super::listing::{AssetListing, ListingId};
use super::operation::{OperationKind, OperationRecord, OperationStatus, RevertReason, SubmissionError};
use crate::error::{MarketError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub u64);

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wf-{}", self.0)
    }
}

/// Single-flight key: one outstanding purchase per account and listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowKey {
    pub account: Address,
    pub listing: ListingId,
}

/// Whether the workflow requests a fresh spend approval first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approval {
    #[default]
    Request,
    /// Rely on whatever allowance the account already granted.
    Existing,
}

/// A caller's request to buy units of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseIntent {
    pub account: Address,
    pub listing: AssetListing,
    pub quantity: Quantity,
    pub approval: Approval,
}

impl PurchaseIntent {
    pub fn new(account: Address, listing: AssetListing, quantity: Quantity) -> Self {
        Self {
            account,
            listing,
            quantity,
            approval: Approval::Request,
        }
    }

    pub fn with_existing_allowance(mut self) -> Self {
        self.approval = Approval::Existing;
        self
    }

    pub fn key(&self) -> WorkflowKey {
        WorkflowKey {
            account: self.account,
            listing: self.listing.id,
        }
    }
}

/// Non-terminal stage a workflow was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Authorizing,
    AwaitingEligibility,
    Purchasing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Authorizing => "authorizing",
            Stage::AwaitingEligibility => "awaiting eligibility",
            Stage::Purchasing => "purchasing",
        };
        f.write_str(name)
    }
}

/// Error taxonomy the workflow surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Submission,
    LedgerRejection,
    PostCondition,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    Submission {
        error: SubmissionError,
    },
    LedgerRejection {
        revert: RevertReason,
    },
    /// Approve confirmed but the re-read allowance is short.
    InsufficientAllowance {
        required: TokenAmount,
        actual: TokenAmount,
    },
    NotEligible,
    /// A post-condition could not be checked because the read failed.
    ReadFailed {
        message: String,
    },
    Timeout {
        handle: TxHash,
        attempts: u32,
    },
    Cancelled,
}

impl FailureReason {
    pub fn kind(&self) -> FailureKind {
        match self {
            FailureReason::Submission { .. } => FailureKind::Submission,
            FailureReason::LedgerRejection { .. } => FailureKind::LedgerRejection,
            FailureReason::InsufficientAllowance { .. }
            | FailureReason::NotEligible
            | FailureReason::ReadFailed { .. } => FailureKind::PostCondition,
            FailureReason::Timeout { .. } => FailureKind::Timeout,
            FailureReason::Cancelled => FailureKind::Cancelled,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Submission { error } => write!(f, "submission failed: {error}"),
            FailureReason::LedgerRejection { revert } => write!(f, "ledger rejected: {revert}"),
            FailureReason::InsufficientAllowance { required, actual } => write!(
                f,
                "allowance {actual} is below the required {required}"
            ),
            FailureReason::NotEligible => f.write_str("account is not eligible"),
            FailureReason::ReadFailed { message } => write!(f, "could not read ledger state: {message}"),
            FailureReason::Timeout { handle, attempts } => write!(
                f,
                "no final status for {handle} after {attempts} polls"
            ),
            FailureReason::Cancelled => f.write_str("cancelled by caller"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    Authorizing,
    AwaitingEligibility,
    Purchasing,
    Completed,
    Failed { stage: Stage, reason: FailureReason },
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed { .. })
    }

    /// Stage a failure from this state is attributed to.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            WorkflowState::Idle => Some(Stage::Idle),
            WorkflowState::Authorizing => Some(Stage::Authorizing),
            WorkflowState::AwaitingEligibility => Some(Stage::AwaitingEligibility),
            WorkflowState::Purchasing => Some(Stage::Purchasing),
            WorkflowState::Completed | WorkflowState::Failed { .. } => None,
        }
    }

    fn allows(&self, next: &WorkflowState) -> bool {
        use WorkflowState::*;
        match (self, next) {
            (_, Failed { .. }) => !self.is_terminal(),
            (Idle, Authorizing)
            | (Idle, AwaitingEligibility)
            | (Authorizing, AwaitingEligibility)
            | (AwaitingEligibility, Purchasing)
            | (Purchasing, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::Idle => f.write_str("idle"),
            WorkflowState::Authorizing => f.write_str("authorizing"),
            WorkflowState::AwaitingEligibility => f.write_str("awaiting eligibility"),
            WorkflowState::Purchasing => f.write_str("purchasing"),
            WorkflowState::Completed => f.write_str("completed"),
            WorkflowState::Failed { stage, reason } => write!(f, "failed while {stage}: {reason}"),
        }
    }
}

/// One purchase attempt: its intent, current state and operation log.
///
/// Transitions are validated against the state graph; terminal states never
/// change again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseWorkflow {
    pub id: WorkflowId,
    pub intent: PurchaseIntent,
    pub required: TokenAmount,
    pub state: WorkflowState,
    pub operations: Vec<OperationRecord>,
}

impl PurchaseWorkflow {
    pub fn new(id: WorkflowId, intent: PurchaseIntent) -> Result<Self> {
        let required = intent.listing.total_price(intent.quantity)?;
        Ok(Self {
            id,
            intent,
            required,
            state: WorkflowState::Idle,
            operations: Vec::new(),
        })
    }

    pub fn key(&self) -> WorkflowKey {
        self.intent.key()
    }

    pub fn transition(&mut self, next: WorkflowState) -> Result<()> {
        if !self.state.allows(&next) {
            return Err(MarketError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Moves to `Failed`, attributing the failure to the current stage.
    pub fn fail(&mut self, reason: FailureReason) -> Result<()> {
        let stage = self.state.stage().ok_or_else(|| MarketError::InvalidTransition {
            from: self.state.to_string(),
            to: "failed".to_string(),
        })?;
        self.transition(WorkflowState::Failed { stage, reason })
    }

    pub fn record_submission(&mut self, kind: OperationKind, handle: TxHash) {
        self.operations.push(OperationRecord {
            kind,
            handle,
            status: OperationStatus::Pending,
        });
    }

    pub fn record_outcome(&mut self, handle: TxHash, status: OperationStatus) {
        if let Some(record) = self.operations.iter_mut().find(|r| r.handle == handle) {
            record.status = status;
        }
    }

    pub fn submitted(&self, kind: OperationKind) -> usize {
        self.operations.iter().filter(|r| r.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::listing::AssetListing;

    fn workflow() -> PurchaseWorkflow {
        let listing = AssetListing::demo(Address::from_low_u64(2), Address::from_low_u64(1)).unwrap();
        let intent = PurchaseIntent::new(Address::from_low_u64(10), listing, Quantity::ONE);
        PurchaseWorkflow::new(WorkflowId(1), intent).unwrap()
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut wf = workflow();
        wf.transition(WorkflowState::Authorizing).unwrap();
        wf.transition(WorkflowState::AwaitingEligibility).unwrap();
        wf.transition(WorkflowState::Purchasing).unwrap();
        wf.transition(WorkflowState::Completed).unwrap();
        assert!(wf.state.is_terminal());
    }

    #[test]
    fn test_cannot_skip_to_purchasing() {
        let mut wf = workflow();
        assert!(matches!(
            wf.transition(WorkflowState::Purchasing),
            Err(MarketError::InvalidTransition { .. })
        ));
        assert_eq!(wf.state, WorkflowState::Idle);
    }

    #[test]
    fn test_fail_records_current_stage() {
        let mut wf = workflow();
        wf.transition(WorkflowState::Authorizing).unwrap();
        wf.fail(FailureReason::NotEligible).unwrap();
        assert_eq!(
            wf.state,
            WorkflowState::Failed {
                stage: Stage::Authorizing,
                reason: FailureReason::NotEligible
            }
        );
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut wf = workflow();
        wf.fail(FailureReason::Cancelled).unwrap();
        assert!(wf.transition(WorkflowState::Authorizing).is_err());
        assert!(wf.fail(FailureReason::NotEligible).is_err());

        let mut done = workflow();
        done.transition(WorkflowState::AwaitingEligibility).unwrap();
        done.transition(WorkflowState::Purchasing).unwrap();
        done.transition(WorkflowState::Completed).unwrap();
        assert!(done.fail(FailureReason::Cancelled).is_err());
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            FailureReason::InsufficientAllowance {
                required: TokenAmount(2),
                actual: TokenAmount(1)
            }
            .kind(),
            FailureKind::PostCondition
        );
        assert_eq!(FailureReason::NotEligible.kind(), FailureKind::PostCondition);
        assert_eq!(
            FailureReason::LedgerRejection {
                revert: RevertReason::Unauthorized
            }
            .kind(),
            FailureKind::LedgerRejection
        );
    }

    #[test]
    fn test_failed_record_survives_json() {
        let mut wf = workflow();
        wf.transition(WorkflowState::Authorizing).unwrap();
        wf.fail(FailureReason::InsufficientAllowance {
            required: wf.required,
            actual: TokenAmount(wf.required.raw() - 1),
        })
        .unwrap();

        let json = serde_json::to_string(&wf).unwrap();
        let restored: PurchaseWorkflow = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, wf);
    }
}
