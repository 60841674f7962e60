use super::address::{Address, TxHash};
use super::amount::{Quantity, TokenAmount};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Program published by the deployment bootstrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "program", rename_all = "snake_case")]
pub enum ProgramSpec {
    /// Fungible payment program with a test faucet.
    Payment,
    /// Asset program bound for its lifetime to `payment_program`.
    Asset {
        payment_program: Address,
        unit_price: TokenAmount,
        /// Lets accounts grant themselves eligibility (demo deployments only).
        self_enrollment: bool,
    },
}

/// Contract call carried by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Call {
    Mint {
        recipient: Address,
        amount: TokenAmount,
    },
    Approve {
        spender: Address,
        amount: TokenAmount,
    },
    SetEligibility {
        account: Address,
        enabled: bool,
    },
    Purchase {
        quantity: Quantity,
    },
    Publish {
        program: ProgramSpec,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Mint,
    Approve,
    SetEligibility,
    Purchase,
    Publish,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Mint => "mint",
            OperationKind::Approve => "approve",
            OperationKind::SetEligibility => "set-eligibility",
            OperationKind::Purchase => "purchase",
            OperationKind::Publish => "publish",
        };
        f.write_str(name)
    }
}

impl Call {
    pub fn kind(&self) -> OperationKind {
        match self {
            Call::Mint { .. } => OperationKind::Mint,
            Call::Approve { .. } => OperationKind::Approve,
            Call::SetEligibility { .. } => OperationKind::SetEligibility,
            Call::Purchase { .. } => OperationKind::Purchase,
            Call::Publish { .. } => OperationKind::Publish,
        }
    }
}

/// A discrete request submitted to the ledger.
///
/// `nonce` is the sender's ordering sequence; callers assign it immediately
/// before submission. Publish operations have no target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub sender: Address,
    pub target: Option<Address>,
    pub call: Call,
    pub nonce: u64,
}

impl Operation {
    pub fn new(sender: Address, target: Address, call: Call) -> Self {
        Self {
            sender,
            target: Some(target),
            call,
            nonce: 0,
        }
    }

    pub fn publish(sender: Address, program: ProgramSpec) -> Self {
        Self {
            sender,
            target: None,
            call: Call::Publish { program },
            nonce: 0,
        }
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.call.kind()
    }
}

/// Result of an operation the ledger included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub block: u64,
    /// Address of the program created by a publish operation.
    pub created: Option<Address>,
}

/// Observed ledger status of a submitted operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Confirmed(Receipt),
    Rejected(RevertReason),
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Pending)
    }
}

/// Why the ledger reverted an admitted operation.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevertReason {
    #[error("insufficient balance: needed {needed}, available {available}")]
    InsufficientBalance {
        needed: TokenAmount,
        available: TokenAmount,
    },
    #[error("insufficient allowance: needed {needed}, approved {approved}")]
    InsufficientAllowance {
        needed: TokenAmount,
        approved: TokenAmount,
    },
    #[error("account is not eligible")]
    NotEligible,
    #[error("sender is not authorized")]
    Unauthorized,
    #[error("arithmetic overflow")]
    Overflow,
    #[error("no program at {0}")]
    UnknownProgram(Address),
    #[error("{0}")]
    Other(String),
}

/// Admission-time rejection: the operation never entered the mempool.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionError {
    #[error("malformed arguments: {0}")]
    MalformedArguments(String),
    #[error("insufficient fee")]
    InsufficientFee,
    #[error("nonce conflict: expected {expected}, got {provided}")]
    NonceConflict { expected: u64, provided: u64 },
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl SubmissionError {
    /// Transient errors may succeed when resubmitted with fresh sequencing.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SubmissionError::NonceConflict { .. } | SubmissionError::Unavailable(_)
        )
    }
}

/// Entry in a workflow's operation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub kind: OperationKind,
    pub handle: TxHash,
    pub status: OperationStatus,
}
