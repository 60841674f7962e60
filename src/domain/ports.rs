use super::address::{Address, TxHash};
use super::amount::TokenAmount;
use super::operation::{Operation, OperationStatus, SubmissionError};
use super::workflow::{PurchaseWorkflow, WorkflowId};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Facade over the external ledger.
///
/// `observe` never blocks; callers poll until a terminal status. The adapter
/// does not reorder submissions, so callers serialize per sender.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn submit(&self, operation: Operation) -> std::result::Result<TxHash, SubmissionError>;
    async fn observe(&self, handle: TxHash) -> Result<OperationStatus>;
    /// Sequence number the next submission from `account` must carry.
    async fn next_sequence(&self, account: Address) -> Result<u64>;
}

/// Reads of ledger-visible account facts against the latest confirmed state.
#[async_trait]
pub trait AccountStateReader: Send + Sync {
    async fn balance_of(&self, payment_program: Address, account: Address) -> Result<TokenAmount>;
    async fn allowance_of(
        &self,
        payment_program: Address,
        owner: Address,
        spender: Address,
    ) -> Result<TokenAmount>;
    async fn is_eligible(&self, asset_program: Address, account: Address) -> Result<bool>;
    /// Units of `asset_program` held by `account`.
    async fn holdings_of(&self, asset_program: Address, account: Address) -> Result<u64>;
}

/// Persists workflow state records.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn store(&self, workflow: PurchaseWorkflow) -> Result<()>;
    async fn get(&self, id: WorkflowId) -> Result<Option<PurchaseWorkflow>>;
    async fn get_all(&self) -> Result<Vec<PurchaseWorkflow>>;
}

/// Decides who may grant eligibility on an asset program.
pub trait EligibilityAuthority: Send + Sync {
    fn may_grant(&self, submitter: Address, account: Address) -> bool;
}

pub type LedgerClientRef = Arc<dyn LedgerClient>;
pub type AccountStateReaderRef = Arc<dyn AccountStateReader>;
pub type WorkflowStoreBox = Box<dyn WorkflowStore>;
pub type EligibilityAuthorityBox = Box<dyn EligibilityAuthority>;
