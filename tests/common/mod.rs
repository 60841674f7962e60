#![allow(dead_code)]

use rust_decimal::Decimal;
use rwa_market::application::deployment::{DeploymentBootstrapper, DeploymentRecord};
use rwa_market::application::orchestrator::PurchaseOrchestrator;
use rwa_market::config::ConfirmationPolicy;
use rwa_market::domain::address::Address;
use rwa_market::domain::amount::{PAYMENT_DECIMALS, TokenAmount};
use rwa_market::domain::listing::AssetListing;
use rwa_market::domain::operation::{Call, Operation, OperationStatus};
use rwa_market::domain::ports::{EligibilityAuthorityBox, LedgerClient};
use rwa_market::infrastructure::dev_ledger::{DEV_DEPLOYER, DevLedger};
use rwa_market::infrastructure::in_memory::InMemoryWorkflowStore;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

pub fn units(value: Decimal) -> TokenAmount {
    TokenAmount::parse_units(value, PAYMENT_DECIMALS).unwrap()
}

pub fn fast_policy() -> ConfirmationPolicy {
    ConfirmationPolicy {
        poll_interval: Duration::from_millis(1),
        max_attempts: 50,
        deadline: Duration::from_secs(10),
    }
}

/// A deployed market on a fresh development ledger.
pub struct Market {
    pub ledger: DevLedger,
    pub deployment: DeploymentRecord,
    pub listing: AssetListing,
    pub orchestrator: Arc<PurchaseOrchestrator>,
}

impl Market {
    pub async fn deploy(authority: EligibilityAuthorityBox, self_enrollment: bool) -> Self {
        Self::deploy_with(authority, self_enrollment, 1, fast_policy()).await
    }

    pub async fn deploy_with(
        authority: EligibilityAuthorityBox,
        self_enrollment: bool,
        confirmation_blocks: u32,
        policy: ConfirmationPolicy,
    ) -> Self {
        let ledger = DevLedger::new(confirmation_blocks);
        let deployment = DeploymentBootstrapper::new(Arc::new(ledger.clone()), policy)
            .deploy(DEV_DEPLOYER, units(dec!(1000)), self_enrollment)
            .await
            .unwrap();
        let listing =
            AssetListing::demo(deployment.asset_program, deployment.payment_program).unwrap();
        let orchestrator = PurchaseOrchestrator::new(
            Arc::new(ledger.clone()),
            Arc::new(ledger.clone()),
            Box::new(InMemoryWorkflowStore::new()),
            authority,
            policy,
        );
        Self {
            ledger,
            deployment,
            listing,
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub async fn fund(&self, account: Address, amount: TokenAmount) {
        self.orchestrator
            .mint_test_funds(account, self.listing.payment_program, account, amount)
            .await
            .unwrap();
    }

    /// Approves an arbitrary amount directly on the ledger, bypassing the
    /// orchestrator.
    pub async fn approve_raw(&self, owner: Address, amount: TokenAmount) {
        let call = Call::Approve {
            spender: self.listing.asset_program,
            amount,
        };
        let status = self
            .settle(Operation::new(owner, self.listing.payment_program, call))
            .await;
        assert!(matches!(status, OperationStatus::Confirmed(_)));
    }

    pub async fn settle(&self, operation: Operation) -> OperationStatus {
        let nonce = self.ledger.next_sequence(operation.sender).await.unwrap();
        let handle = self.ledger.submit(operation.with_nonce(nonce)).await.unwrap();
        loop {
            let status = self.ledger.observe(handle).await.unwrap();
            if status.is_terminal() {
                return status;
            }
        }
    }
}
