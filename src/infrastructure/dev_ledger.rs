use crate::domain::address::{Address, TxHash};
use crate::domain::amount::TokenAmount;
use crate::domain::operation::{
    Call, Operation, OperationKind, OperationStatus, ProgramSpec, Receipt, RevertReason,
    SubmissionError,
};
use crate::domain::ports::{AccountStateReader, LedgerClient};
use crate::error::{MarketError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Well-known development account that publishes the programs.
pub const DEV_DEPLOYER: Address = Address::from_low_u64(1);
/// Well-known development account used as the buyer.
pub const DEV_BUYER: Address = Address::from_low_u64(2);

#[derive(Debug, Default)]
struct PaymentProgram {
    balances: HashMap<Address, TokenAmount>,
    /// Keyed by (owner, spender).
    allowances: HashMap<(Address, Address), TokenAmount>,
}

#[derive(Debug)]
struct AssetProgram {
    owner: Address,
    payment_program: Address,
    unit_price: TokenAmount,
    self_enrollment: bool,
    eligible: HashSet<Address>,
    holdings: HashMap<Address, u64>,
}

#[derive(Debug)]
struct PendingOperation {
    operation: Operation,
    observations: u32,
}

#[derive(Debug, Default)]
struct Faults {
    admission: VecDeque<SubmissionError>,
    approval_cap: Option<TokenAmount>,
    stalled: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    confirmation_blocks: u32,
    height: u64,
    sequences: HashMap<Address, u64>,
    payments: HashMap<Address, PaymentProgram>,
    assets: HashMap<Address, AssetProgram>,
    mempool: HashMap<TxHash, PendingOperation>,
    outcomes: HashMap<TxHash, OperationStatus>,
    submissions: Vec<Operation>,
    faults: Faults,
}

impl LedgerState {
    fn admit(&self, op: &Operation) -> std::result::Result<(), SubmissionError> {
        match (&op.call, op.target) {
            (Call::Publish { program }, None) => {
                if let ProgramSpec::Asset {
                    payment_program, ..
                } = program
                    && !self.payments.contains_key(payment_program)
                {
                    return Err(SubmissionError::MalformedArguments(format!(
                        "no payment program at {payment_program}"
                    )));
                }
            }
            (Call::Publish { .. }, Some(target)) => {
                return Err(SubmissionError::MalformedArguments(format!(
                    "publish must not target {target}"
                )));
            }
            (Call::Mint { .. } | Call::Approve { .. }, Some(target)) => {
                if !self.payments.contains_key(&target) {
                    return Err(SubmissionError::MalformedArguments(format!(
                        "{target} is not a payment program"
                    )));
                }
            }
            (Call::SetEligibility { .. } | Call::Purchase { .. }, Some(target)) => {
                if !self.assets.contains_key(&target) {
                    return Err(SubmissionError::MalformedArguments(format!(
                        "{target} is not an asset program"
                    )));
                }
            }
            (_, None) => {
                return Err(SubmissionError::MalformedArguments(
                    "missing target program".to_string(),
                ));
            }
        }

        let expected = self.sequences.get(&op.sender).copied().unwrap_or(0);
        if op.nonce != expected {
            return Err(SubmissionError::NonceConflict {
                expected,
                provided: op.nonce,
            });
        }
        Ok(())
    }

    /// Applies an included operation atomically: on revert nothing changes.
    fn execute(&mut self, op: &Operation) -> OperationStatus {
        self.height += 1;
        let block = self.height;
        let confirmed = |created| OperationStatus::Confirmed(Receipt { block, created });
        let target = op.target.unwrap_or(Address::ZERO);

        match &op.call {
            Call::Mint { recipient, amount } => {
                let Some(payment) = self.payments.get_mut(&target) else {
                    return OperationStatus::Rejected(RevertReason::UnknownProgram(target));
                };
                let balance = payment.balances.entry(*recipient).or_default();
                match balance.checked_add(*amount) {
                    Some(updated) => {
                        *balance = updated;
                        confirmed(None)
                    }
                    None => OperationStatus::Rejected(RevertReason::Overflow),
                }
            }
            Call::Approve { spender, amount } => {
                let Some(payment) = self.payments.get_mut(&target) else {
                    return OperationStatus::Rejected(RevertReason::UnknownProgram(target));
                };
                let effective = match self.faults.approval_cap {
                    Some(cap) => (*amount).min(cap),
                    None => *amount,
                };
                payment.allowances.insert((op.sender, *spender), effective);
                confirmed(None)
            }
            Call::SetEligibility { account, enabled } => {
                let Some(asset) = self.assets.get_mut(&target) else {
                    return OperationStatus::Rejected(RevertReason::UnknownProgram(target));
                };
                let authorized =
                    op.sender == asset.owner || (asset.self_enrollment && op.sender == *account);
                if !authorized {
                    return OperationStatus::Rejected(RevertReason::Unauthorized);
                }
                if *enabled {
                    asset.eligible.insert(*account);
                } else {
                    asset.eligible.remove(account);
                }
                confirmed(None)
            }
            Call::Purchase { quantity } => {
                let Some(asset) = self.assets.get_mut(&target) else {
                    return OperationStatus::Rejected(RevertReason::UnknownProgram(target));
                };
                if !asset.eligible.contains(&op.sender) {
                    return OperationStatus::Rejected(RevertReason::NotEligible);
                }
                let Some(cost) = asset.unit_price.checked_mul(*quantity) else {
                    return OperationStatus::Rejected(RevertReason::Overflow);
                };
                let Some(payment) = self.payments.get_mut(&asset.payment_program) else {
                    return OperationStatus::Rejected(RevertReason::Other(
                        "bound payment program is missing".to_string(),
                    ));
                };

                let allowance_key = (op.sender, target);
                let approved = payment
                    .allowances
                    .get(&allowance_key)
                    .copied()
                    .unwrap_or_default();
                if approved < cost {
                    return OperationStatus::Rejected(RevertReason::InsufficientAllowance {
                        needed: cost,
                        approved,
                    });
                }
                let available = payment
                    .balances
                    .get(&op.sender)
                    .copied()
                    .unwrap_or_default();
                let Some(remaining) = available.checked_sub(cost) else {
                    return OperationStatus::Rejected(RevertReason::InsufficientBalance {
                        needed: cost,
                        available,
                    });
                };
                let treasury = if asset.owner == op.sender {
                    remaining
                } else {
                    payment.balances.get(&asset.owner).copied().unwrap_or_default()
                };
                let Some(treasury) = treasury.checked_add(cost) else {
                    return OperationStatus::Rejected(RevertReason::Overflow);
                };
                let holding = asset.holdings.get(&op.sender).copied().unwrap_or(0);
                let Some(holding) = holding.checked_add(quantity.get()) else {
                    return OperationStatus::Rejected(RevertReason::Overflow);
                };

                payment.balances.insert(op.sender, remaining);
                payment.balances.insert(asset.owner, treasury);
                payment
                    .allowances
                    .insert(allowance_key, TokenAmount(approved.raw() - cost.raw()));
                asset.holdings.insert(op.sender, holding);
                confirmed(None)
            }
            Call::Publish { program } => {
                let address = Address::derive(&op.sender, op.nonce);
                match program {
                    ProgramSpec::Payment => {
                        self.payments.insert(address, PaymentProgram::default());
                    }
                    ProgramSpec::Asset {
                        payment_program,
                        unit_price,
                        self_enrollment,
                    } => {
                        self.assets.insert(
                            address,
                            AssetProgram {
                                owner: op.sender,
                                payment_program: *payment_program,
                                unit_price: *unit_price,
                                self_enrollment: *self_enrollment,
                                eligible: HashSet::new(),
                                holdings: HashMap::new(),
                            },
                        );
                    }
                }
                info!(%address, sender = %op.sender, "program published");
                confirmed(Some(address))
            }
        }
    }
}

/// In-process development ledger.
///
/// Operations sit in a mempool until they have been observed
/// `confirmation_blocks` times, then execute atomically. Final outcomes are
/// kept forever so repeated observation returns the same status. Clones share
/// the same chain.
#[derive(Clone, Default)]
pub struct DevLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl DevLedger {
    pub fn new(confirmation_blocks: u32) -> Self {
        let state = LedgerState {
            confirmation_blocks,
            ..LedgerState::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Rejects the next submission at admission with `error`. Queued errors
    /// are consumed in order.
    pub async fn fail_next_submission(&self, error: SubmissionError) {
        self.state.write().await.faults.admission.push_back(error);
    }

    /// Approvals take effect with at most `cap`, whatever was requested.
    pub async fn cap_approvals(&self, cap: TokenAmount) {
        self.state.write().await.faults.approval_cap = Some(cap);
    }

    /// While stalled, pending operations are never included.
    pub async fn set_stalled(&self, stalled: bool) {
        self.state.write().await.faults.stalled = stalled;
    }

    /// Every operation admitted so far, in admission order.
    pub async fn submissions(&self) -> Vec<Operation> {
        self.state.read().await.submissions.clone()
    }

    pub async fn submitted(&self, kind: OperationKind) -> usize {
        self.state
            .read()
            .await
            .submissions
            .iter()
            .filter(|op| op.kind() == kind)
            .count()
    }

    pub async fn height(&self) -> u64 {
        self.state.read().await.height
    }
}

fn unknown_program(kind: &str, address: Address) -> MarketError {
    MarketError::ValidationError(format!("no {kind} program at {address}"))
}

fn payload(op: &Operation) -> std::result::Result<Vec<u8>, SubmissionError> {
    serde_json::to_vec(&op.call).map_err(|e| SubmissionError::MalformedArguments(e.to_string()))
}

#[async_trait]
impl LedgerClient for DevLedger {
    async fn submit(&self, operation: Operation) -> std::result::Result<TxHash, SubmissionError> {
        let mut state = self.state.write().await;
        if let Some(error) = state.faults.admission.pop_front() {
            debug!(sender = %operation.sender, %error, "submission refused");
            return Err(error);
        }
        state.admit(&operation)?;

        let handle = TxHash::compute(&operation.sender, operation.nonce, &payload(&operation)?);
        state.sequences.insert(operation.sender, operation.nonce + 1);
        state.submissions.push(operation.clone());
        debug!(%handle, kind = %operation.kind(), nonce = operation.nonce, "operation admitted");
        state.mempool.insert(
            handle,
            PendingOperation {
                operation,
                observations: 0,
            },
        );
        Ok(handle)
    }

    async fn observe(&self, handle: TxHash) -> Result<OperationStatus> {
        let mut state = self.state.write().await;
        if let Some(outcome) = state.outcomes.get(&handle) {
            return Ok(outcome.clone());
        }

        let required = state.confirmation_blocks;
        let stalled = state.faults.stalled;
        let pending = state
            .mempool
            .get_mut(&handle)
            .ok_or(MarketError::UnknownHandle(handle))?;
        pending.observations += 1;
        if stalled || pending.observations < required {
            return Ok(OperationStatus::Pending);
        }

        let Some(pending) = state.mempool.remove(&handle) else {
            return Err(MarketError::UnknownHandle(handle));
        };
        let outcome = state.execute(&pending.operation);
        debug!(%handle, ?outcome, "operation included");
        state.outcomes.insert(handle, outcome.clone());
        Ok(outcome)
    }

    async fn next_sequence(&self, account: Address) -> Result<u64> {
        Ok(self
            .state
            .read()
            .await
            .sequences
            .get(&account)
            .copied()
            .unwrap_or(0))
    }
}

#[async_trait]
impl AccountStateReader for DevLedger {
    async fn balance_of(&self, payment_program: Address, account: Address) -> Result<TokenAmount> {
        let state = self.state.read().await;
        let payment = state
            .payments
            .get(&payment_program)
            .ok_or_else(|| unknown_program("payment", payment_program))?;
        Ok(payment.balances.get(&account).copied().unwrap_or_default())
    }

    async fn allowance_of(
        &self,
        payment_program: Address,
        owner: Address,
        spender: Address,
    ) -> Result<TokenAmount> {
        let state = self.state.read().await;
        let payment = state
            .payments
            .get(&payment_program)
            .ok_or_else(|| unknown_program("payment", payment_program))?;
        Ok(payment
            .allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn is_eligible(&self, asset_program: Address, account: Address) -> Result<bool> {
        let state = self.state.read().await;
        let asset = state
            .assets
            .get(&asset_program)
            .ok_or_else(|| unknown_program("asset", asset_program))?;
        Ok(asset.eligible.contains(&account))
    }

    async fn holdings_of(&self, asset_program: Address, account: Address) -> Result<u64> {
        let state = self.state.read().await;
        let asset = state
            .assets
            .get(&asset_program)
            .ok_or_else(|| unknown_program("asset", asset_program))?;
        Ok(asset.holdings.get(&account).copied().unwrap_or(0))
    }
}
