use crate::domain::address::{Address, TxHash};
use crate::domain::listing::ListingId;
use crate::domain::operation::{RevertReason, SubmissionError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarketError {
    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),
    #[error("Ledger rejected operation {handle}: {reason}")]
    LedgerRejection { handle: TxHash, reason: RevertReason },
    #[error("Post-condition failure: {0}")]
    PostCondition(String),
    #[error("Timed out waiting for {handle} after {attempts} polls ({elapsed:?})")]
    Timeout {
        handle: TxHash,
        attempts: u32,
        elapsed: Duration,
    },
    #[error("Cancelled while waiting for {0}")]
    Cancelled(TxHash),
    #[error("Purchase already in progress for {account} on listing {listing}")]
    AlreadyInProgress { account: Address, listing: ListingId },
    #[error("{submitter} is not allowed to change eligibility of {account}")]
    Unauthorized { submitter: Address, account: Address },
    #[error("Invalid workflow transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Unknown operation handle {0}")]
    UnknownHandle(TxHash),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDB(#[from] rocksdb::Error),
}

pub type Result<T> = std::result::Result<T, MarketError>;
