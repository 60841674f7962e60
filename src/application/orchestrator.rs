use super::confirmation::{ConfirmationWatcher, Settlement};
use super::sequencer::SubmissionSequencer;
use crate::config::ConfirmationPolicy;
use crate::domain::address::{Address, TxHash};
use crate::domain::amount::{Quantity, TokenAmount};
use crate::domain::listing::AssetListing;
use crate::domain::operation::{Call, Operation, OperationKind, OperationStatus, Receipt};
use crate::domain::ports::{
    AccountStateReaderRef, EligibilityAuthorityBox, LedgerClientRef, WorkflowStoreBox,
};
use crate::domain::workflow::{
    Approval, FailureReason, PurchaseIntent, PurchaseWorkflow, WorkflowId, WorkflowKey,
    WorkflowState,
};
use crate::error::{MarketError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type Registry = Arc<Mutex<HashMap<WorkflowKey, Marker>>>;

/// Single-flight state of one (account, listing) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Marker {
    /// A workflow for the pair is registered and not yet dropped.
    active: bool,
    /// Purchase submitted for the pair whose ledger status is not known to
    /// be terminal.
    purchase: Option<TxHash>,
}

/// Marks an (account, listing) pair as having a purchase in flight.
///
/// Dropping the guard retires the workflow. The marker itself stays in the
/// registry while a submitted Purchase has not been seen Confirmed or
/// Rejected, so a timed out, cancelled or abandoned workflow still blocks
/// the pair.
struct InFlightGuard {
    key: WorkflowKey,
    registry: Registry,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut markers = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        match markers.get_mut(&self.key) {
            Some(marker) if marker.purchase.is_some() => marker.active = false,
            _ => {
                markers.remove(&self.key);
            }
        }
    }
}

/// Outcome of trying to take the marker for a pair.
enum Claim {
    Taken,
    Busy,
    Unsettled(TxHash),
}

/// A registered purchase workflow that has not been driven yet.
pub struct WorkflowTicket {
    workflow: PurchaseWorkflow,
    updates: watch::Sender<WorkflowState>,
    _guard: InFlightGuard,
}

impl WorkflowTicket {
    pub fn id(&self) -> WorkflowId {
        self.workflow.id
    }

    pub fn workflow(&self) -> &PurchaseWorkflow {
        &self.workflow
    }

    /// Receives every state the workflow passes through.
    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.updates.subscribe()
    }
}

/// Drives purchase workflows against the ledger.
///
/// Each workflow runs its stages strictly in order, waiting for every
/// operation to settle before the next is submitted. Workflows for different
/// accounts may be driven concurrently through a shared orchestrator.
pub struct PurchaseOrchestrator {
    ledger: LedgerClientRef,
    reader: AccountStateReaderRef,
    store: WorkflowStoreBox,
    authority: EligibilityAuthorityBox,
    watcher: ConfirmationWatcher,
    sequencer: SubmissionSequencer,
    in_flight: Registry,
    next_id: AtomicU64,
}

impl PurchaseOrchestrator {
    /// Creates a new `PurchaseOrchestrator`.
    ///
    /// # Arguments
    ///
    /// * `ledger` - Adapter used to submit and observe operations.
    /// * `reader` - Source of confirmed account facts for post-condition checks.
    /// * `store` - Where workflow records are persisted after every transition.
    /// * `authority` - Who may grant eligibility.
    /// * `policy` - Polling bound for every submitted operation.
    pub fn new(
        ledger: LedgerClientRef,
        reader: AccountStateReaderRef,
        store: WorkflowStoreBox,
        authority: EligibilityAuthorityBox,
        policy: ConfirmationPolicy,
    ) -> Self {
        Self {
            watcher: ConfirmationWatcher::new(ledger.clone(), policy),
            ledger,
            reader,
            store,
            authority,
            sequencer: SubmissionSequencer::new(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Continues workflow numbering after the records already in the store.
    pub async fn resume_ids(self) -> Result<Self> {
        let last = self
            .store
            .get_all()
            .await?
            .iter()
            .map(|wf| wf.id.0)
            .max()
            .unwrap_or(0);
        self.next_id.store(last + 1, Ordering::SeqCst);
        Ok(self)
    }

    /// Faucet: mints test payment funds to `recipient`.
    pub async fn mint_test_funds(
        &self,
        sender: Address,
        payment_program: Address,
        recipient: Address,
        amount: TokenAmount,
    ) -> Result<Receipt> {
        info!(%recipient, %amount, "minting test funds");
        let call = Call::Mint { recipient, amount };
        self.settle(Operation::new(sender, payment_program, call))
            .await
    }

    /// Privileged intent: sets `account`'s eligibility on `asset_program`.
    ///
    /// Refused locally, without touching the ledger, when the authority does
    /// not let `submitter` grant eligibility to `account`.
    pub async fn grant_eligibility(
        &self,
        submitter: Address,
        asset_program: Address,
        account: Address,
        enabled: bool,
    ) -> Result<Receipt> {
        if !self.authority.may_grant(submitter, account) {
            warn!(%submitter, %account, "eligibility change refused by authority");
            return Err(MarketError::Unauthorized { submitter, account });
        }
        info!(%submitter, %account, enabled, "changing eligibility");
        let call = Call::SetEligibility { account, enabled };
        self.settle(Operation::new(submitter, asset_program, call))
            .await
    }

    /// Approves the asset program to spend the price of `quantity` units and
    /// verifies the resulting allowance.
    pub async fn approve_spend(
        &self,
        account: Address,
        listing: &AssetListing,
        quantity: Quantity,
    ) -> Result<TokenAmount> {
        let required = listing.total_price(quantity)?;
        let call = Call::Approve {
            spender: listing.asset_program,
            amount: required,
        };
        self.settle(Operation::new(account, listing.payment_program, call))
            .await?;

        let allowance = self
            .reader
            .allowance_of(listing.payment_program, account, listing.asset_program)
            .await?;
        if allowance < required {
            return Err(MarketError::PostCondition(format!(
                "allowance {allowance} is below the required {required}"
            )));
        }
        Ok(allowance)
    }

    async fn settle(&self, operation: Operation) -> Result<Receipt> {
        let handle = self
            .sequencer
            .submit_with_retry(self.ledger.as_ref(), operation)
            .await?;
        self.watcher
            .wait(handle, &CancellationToken::new())
            .await
            .into_result(handle)
    }

    /// Whether a purchase for `key` is currently in flight: a workflow is
    /// running for it, or its last Purchase has not settled on the ledger.
    pub fn is_in_flight(&self, key: &WorkflowKey) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Registers a new purchase workflow.
    ///
    /// Fails with `AlreadyInProgress` when another workflow for the same
    /// account and listing has not reached a terminal state, or when a
    /// Purchase it submitted is still pending on the ledger. Such a pending
    /// Purchase is observed once; nothing is submitted.
    pub async fn begin(&self, intent: PurchaseIntent) -> Result<WorkflowTicket> {
        let key = intent.key();
        let id = WorkflowId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let workflow = PurchaseWorkflow::new(id, intent)?;
        self.claim(key).await?;

        let (updates, _) = watch::channel(workflow.state.clone());
        Ok(WorkflowTicket {
            workflow,
            updates,
            _guard: InFlightGuard {
                key,
                registry: self.in_flight.clone(),
            },
        })
    }

    /// Runs a registered workflow to a terminal state.
    ///
    /// Workflow failures are reported through the returned workflow's state;
    /// `Err` means the workflow record itself could not be maintained.
    pub async fn drive(
        &self,
        ticket: WorkflowTicket,
        cancel: &CancellationToken,
    ) -> Result<PurchaseWorkflow> {
        let WorkflowTicket {
            mut workflow,
            updates,
            _guard,
        } = ticket;

        self.store.store(workflow.clone()).await?;
        self.run(&mut workflow, &updates, cancel).await?;
        Ok(workflow)
    }

    /// Registers and drives a purchase in one call.
    pub async fn purchase(
        &self,
        intent: PurchaseIntent,
        cancel: &CancellationToken,
    ) -> Result<PurchaseWorkflow> {
        let ticket = self.begin(intent).await?;
        self.drive(ticket, cancel).await
    }

    async fn claim(&self, key: WorkflowKey) -> Result<()> {
        let pending = match self.try_claim(key) {
            Claim::Taken => return Ok(()),
            Claim::Busy => return Err(already_in_progress(key)),
            Claim::Unsettled(handle) => handle,
        };

        let settled = match self.ledger.observe(pending).await {
            Ok(status) => status.is_terminal(),
            Err(error) => {
                warn!(handle = %pending, %error, "could not observe previous purchase");
                false
            }
        };
        if settled {
            let mut markers = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(marker) = markers.get_mut(&key)
                && !marker.active
                && marker.purchase == Some(pending)
            {
                *marker = Marker {
                    active: true,
                    purchase: None,
                };
                return Ok(());
            }
        }
        info!(
            account = %key.account,
            listing = %key.listing,
            handle = %pending,
            "previous purchase still outstanding"
        );
        Err(already_in_progress(key))
    }

    fn try_claim(&self, key: WorkflowKey) -> Claim {
        let mut markers = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        match markers.get(&key).copied() {
            None => {
                markers.insert(
                    key,
                    Marker {
                        active: true,
                        purchase: None,
                    },
                );
                Claim::Taken
            }
            Some(Marker {
                purchase: Some(handle),
                active: false,
            }) => Claim::Unsettled(handle),
            Some(_) => {
                info!(account = %key.account, listing = %key.listing, "purchase already in progress");
                Claim::Busy
            }
        }
    }

    fn track_purchase(&self, key: WorkflowKey, handle: Option<TxHash>) {
        let mut markers = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(marker) = markers.get_mut(&key) {
            marker.purchase = handle;
        }
    }

    /// Latest persisted record of a workflow.
    pub async fn workflow(&self, id: WorkflowId) -> Result<Option<PurchaseWorkflow>> {
        self.store.get(id).await
    }

    async fn run(
        &self,
        wf: &mut PurchaseWorkflow,
        updates: &watch::Sender<WorkflowState>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if wf.intent.approval == Approval::Request {
            self.advance(wf, updates, WorkflowState::Authorizing).await?;
            if let Err(reason) = self.authorize(wf, cancel).await {
                return self.fail(wf, updates, reason).await;
            }
        }

        self.advance(wf, updates, WorkflowState::AwaitingEligibility)
            .await?;
        if let Err(reason) = self.ensure_eligible(wf, cancel).await {
            return self.fail(wf, updates, reason).await;
        }

        self.advance(wf, updates, WorkflowState::Purchasing).await?;
        let call = Call::Purchase {
            quantity: wf.intent.quantity,
        };
        let asset_program = wf.intent.listing.asset_program;
        match self.execute(wf, asset_program, call, cancel).await {
            Ok(_) => self.advance(wf, updates, WorkflowState::Completed).await,
            Err(reason) => self.fail(wf, updates, reason).await,
        }
    }

    async fn authorize(
        &self,
        wf: &mut PurchaseWorkflow,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), FailureReason> {
        let listing = wf.intent.listing.clone();
        let account = wf.intent.account;
        let call = Call::Approve {
            spender: listing.asset_program,
            amount: wf.required,
        };
        self.execute(wf, listing.payment_program, call, cancel)
            .await?;

        // The ledger may apply a different amount than requested.
        let actual = self
            .reader
            .allowance_of(listing.payment_program, account, listing.asset_program)
            .await
            .map_err(read_failed)?;
        if actual < wf.required {
            return Err(FailureReason::InsufficientAllowance {
                required: wf.required,
                actual,
            });
        }
        Ok(())
    }

    async fn ensure_eligible(
        &self,
        wf: &mut PurchaseWorkflow,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), FailureReason> {
        let account = wf.intent.account;
        let asset_program = wf.intent.listing.asset_program;
        if self.eligible(asset_program, account).await? {
            return Ok(());
        }
        if !self.authority.may_grant(account, account) {
            info!(workflow = %wf.id, %account, "not eligible and may not self-enroll");
            return Err(FailureReason::NotEligible);
        }

        let call = Call::SetEligibility {
            account,
            enabled: true,
        };
        self.execute(wf, asset_program, call, cancel).await?;
        if !self.eligible(asset_program, account).await? {
            return Err(FailureReason::NotEligible);
        }
        Ok(())
    }

    async fn eligible(
        &self,
        asset_program: Address,
        account: Address,
    ) -> std::result::Result<bool, FailureReason> {
        self.reader
            .is_eligible(asset_program, account)
            .await
            .map_err(read_failed)
    }

    /// Submits one operation on behalf of the workflow's account and waits
    /// for it to settle, logging it in the workflow record.
    async fn execute(
        &self,
        wf: &mut PurchaseWorkflow,
        target: Address,
        call: Call,
        cancel: &CancellationToken,
    ) -> std::result::Result<Receipt, FailureReason> {
        if cancel.is_cancelled() {
            return Err(FailureReason::Cancelled);
        }

        let operation = Operation::new(wf.intent.account, target, call);
        let kind = operation.kind();
        let handle = self
            .sequencer
            .submit_with_retry(self.ledger.as_ref(), operation)
            .await
            .map_err(|error| FailureReason::Submission { error })?;
        info!(workflow = %wf.id, %kind, %handle, "operation submitted");
        wf.record_submission(kind, handle);
        let purchase = kind == OperationKind::Purchase;
        if purchase {
            self.track_purchase(wf.key(), Some(handle));
        }

        match self.watcher.wait(handle, cancel).await {
            Settlement::Confirmed(receipt) => {
                if purchase {
                    self.track_purchase(wf.key(), None);
                }
                wf.record_outcome(handle, OperationStatus::Confirmed(receipt.clone()));
                Ok(receipt)
            }
            Settlement::Rejected(revert) => {
                if purchase {
                    self.track_purchase(wf.key(), None);
                }
                wf.record_outcome(handle, OperationStatus::Rejected(revert.clone()));
                Err(FailureReason::LedgerRejection { revert })
            }
            Settlement::TimedOut { attempts, .. } => {
                Err(FailureReason::Timeout { handle, attempts })
            }
            Settlement::Cancelled => Err(FailureReason::Cancelled),
        }
    }

    async fn advance(
        &self,
        wf: &mut PurchaseWorkflow,
        updates: &watch::Sender<WorkflowState>,
        next: WorkflowState,
    ) -> Result<()> {
        wf.transition(next)?;
        info!(workflow = %wf.id, state = %wf.state, "workflow advanced");
        self.publish(wf, updates).await
    }

    async fn fail(
        &self,
        wf: &mut PurchaseWorkflow,
        updates: &watch::Sender<WorkflowState>,
        reason: FailureReason,
    ) -> Result<()> {
        wf.fail(reason)?;
        warn!(workflow = %wf.id, state = %wf.state, "workflow failed");
        self.publish(wf, updates).await
    }

    async fn publish(
        &self,
        wf: &PurchaseWorkflow,
        updates: &watch::Sender<WorkflowState>,
    ) -> Result<()> {
        updates.send_replace(wf.state.clone());
        self.store.store(wf.clone()).await
    }
}

fn already_in_progress(key: WorkflowKey) -> MarketError {
    MarketError::AlreadyInProgress {
        account: key.account,
        listing: key.listing,
    }
}

fn read_failed(error: MarketError) -> FailureReason {
    FailureReason::ReadFailed {
        message: error.to_string(),
    }
}
