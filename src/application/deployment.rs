use super::confirmation::ConfirmationWatcher;
use super::sequencer::SubmissionSequencer;
use crate::config::ConfirmationPolicy;
use crate::domain::address::Address;
use crate::domain::amount::TokenAmount;
use crate::domain::operation::{Operation, ProgramSpec};
use crate::domain::ports::LedgerClientRef;
use crate::error::{MarketError, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Addresses of a published program pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub payment_program: Address,
    pub asset_program: Address,
}

/// Publishes the payment program, then the asset program bound to it.
///
/// Any failure aborts the deployment. Nothing already published is rolled
/// back.
pub struct DeploymentBootstrapper {
    ledger: LedgerClientRef,
    watcher: ConfirmationWatcher,
    sequencer: SubmissionSequencer,
}

impl DeploymentBootstrapper {
    pub fn new(ledger: LedgerClientRef, policy: ConfirmationPolicy) -> Self {
        Self {
            watcher: ConfirmationWatcher::new(ledger.clone(), policy),
            ledger,
            sequencer: SubmissionSequencer::new(),
        }
    }

    pub async fn deploy(
        &self,
        deployer: Address,
        unit_price: TokenAmount,
        self_enrollment: bool,
    ) -> Result<DeploymentRecord> {
        info!(%deployer, "deploying payment program");
        let payment_program = self.publish(deployer, ProgramSpec::Payment).await?;
        info!(%payment_program, "payment program deployed");

        info!(%deployer, %unit_price, self_enrollment, "deploying asset program");
        let asset = ProgramSpec::Asset {
            payment_program,
            unit_price,
            self_enrollment,
        };
        let asset_program = self.publish(deployer, asset).await?;
        info!(%asset_program, "asset program deployed");

        Ok(DeploymentRecord {
            payment_program,
            asset_program,
        })
    }

    async fn publish(&self, deployer: Address, program: ProgramSpec) -> Result<Address> {
        let handle = self
            .sequencer
            .submit_once(self.ledger.as_ref(), Operation::publish(deployer, program))
            .await?;
        let receipt = self
            .watcher
            .wait(handle, &CancellationToken::new())
            .await
            .into_result(handle)?;
        receipt.created.ok_or_else(|| {
            MarketError::PostCondition(format!("publication {handle} created no program"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::operation::{OperationKind, SubmissionError};
    use crate::domain::ports::AccountStateReader;
    use crate::infrastructure::dev_ledger::DevLedger;
    use std::sync::Arc;
    use std::time::Duration;

    const DEPLOYER: Address = Address::from_low_u64(1);

    fn policy() -> ConfirmationPolicy {
        ConfirmationPolicy {
            poll_interval: Duration::from_millis(1),
            max_attempts: 5,
            deadline: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_deploy_publishes_both_programs_in_order() {
        let ledger = DevLedger::new(2);
        let bootstrapper = DeploymentBootstrapper::new(Arc::new(ledger.clone()), policy());

        let record = bootstrapper
            .deploy(DEPLOYER, TokenAmount(1000), true)
            .await
            .unwrap();
        assert_ne!(record.payment_program, record.asset_program);

        let submissions = ledger.submissions().await;
        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[0].nonce, 0);
        assert_eq!(submissions[1].nonce, 1);
        assert!(
            ledger
                .balance_of(record.payment_program, DEPLOYER)
                .await
                .unwrap()
                .is_zero()
        );
    }

    #[tokio::test]
    async fn test_asset_never_published_without_payment_program() {
        let ledger = DevLedger::new(1);
        ledger.set_stalled(true).await;
        let bootstrapper = DeploymentBootstrapper::new(Arc::new(ledger.clone()), policy());

        let err = bootstrapper
            .deploy(DEPLOYER, TokenAmount(1000), true)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Timeout { attempts: 5, .. }));
        assert_eq!(ledger.submitted(OperationKind::Publish).await, 1);
    }

    #[tokio::test]
    async fn test_submission_failure_aborts_without_retry() {
        let ledger = DevLedger::new(1);
        ledger
            .fail_next_submission(SubmissionError::Unavailable("offline".to_string()))
            .await;
        let bootstrapper = DeploymentBootstrapper::new(Arc::new(ledger.clone()), policy());

        let err = bootstrapper
            .deploy(DEPLOYER, TokenAmount(1000), true)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Submission(SubmissionError::Unavailable(_))));
        assert!(ledger.submissions().await.is_empty());
    }
}
