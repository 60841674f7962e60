use crate::config::ConfirmationPolicy;
use crate::domain::address::TxHash;
use crate::domain::operation::{OperationStatus, Receipt, RevertReason};
use crate::domain::ports::LedgerClientRef;
use crate::error::{MarketError, Result};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// How waiting on a submitted operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Confirmed(Receipt),
    Rejected(RevertReason),
    TimedOut { attempts: u32, elapsed: Duration },
    Cancelled,
}

impl Settlement {
    pub fn into_result(self, handle: TxHash) -> Result<Receipt> {
        match self {
            Settlement::Confirmed(receipt) => Ok(receipt),
            Settlement::Rejected(reason) => Err(MarketError::LedgerRejection { handle, reason }),
            Settlement::TimedOut { attempts, elapsed } => Err(MarketError::Timeout {
                handle,
                attempts,
                elapsed,
            }),
            Settlement::Cancelled => Err(MarketError::Cancelled(handle)),
        }
    }
}

/// Polls the ledger until an operation reaches a terminal status, the
/// policy bound is hit, or the caller cancels.
///
/// Cancelling only stops local polling; the operation stays on the ledger.
#[derive(Clone)]
pub struct ConfirmationWatcher {
    ledger: LedgerClientRef,
    policy: ConfirmationPolicy,
}

impl ConfirmationWatcher {
    pub fn new(ledger: LedgerClientRef, policy: ConfirmationPolicy) -> Self {
        Self { ledger, policy }
    }

    pub async fn wait(&self, handle: TxHash, cancel: &CancellationToken) -> Settlement {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                debug!(%handle, attempts, "stopped waiting: cancelled");
                return Settlement::Cancelled;
            }

            attempts += 1;
            match self.ledger.observe(handle).await {
                Ok(OperationStatus::Confirmed(receipt)) => {
                    debug!(%handle, attempts, block = receipt.block, "operation confirmed");
                    return Settlement::Confirmed(receipt);
                }
                Ok(OperationStatus::Rejected(reason)) => {
                    debug!(%handle, attempts, %reason, "operation rejected");
                    return Settlement::Rejected(reason);
                }
                Ok(OperationStatus::Pending) => trace!(%handle, attempts, "still pending"),
                // Observation failures count against the budget like a pending poll.
                Err(e) => warn!(%handle, attempts, error = %e, "observation failed"),
            }

            let elapsed = started.elapsed();
            if attempts >= self.policy.max_attempts || elapsed >= self.policy.deadline {
                warn!(%handle, attempts, ?elapsed, "no terminal status within policy bound");
                return Settlement::TimedOut { attempts, elapsed };
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%handle, attempts, "stopped waiting: cancelled");
                    return Settlement::Cancelled;
                }
                _ = sleep(self.policy.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::address::Address;
    use crate::domain::operation::{Operation, ProgramSpec};
    use crate::domain::ports::LedgerClient;
    use crate::infrastructure::dev_ledger::DevLedger;
    use std::sync::Arc;

    fn policy(max_attempts: u32) -> ConfirmationPolicy {
        ConfirmationPolicy {
            poll_interval: Duration::from_millis(1),
            max_attempts,
            deadline: Duration::from_secs(5),
        }
    }

    async fn submit_publish(ledger: &DevLedger) -> TxHash {
        ledger
            .submit(Operation::publish(Address::from_low_u64(1), ProgramSpec::Payment))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_wait_until_confirmed() {
        let ledger = DevLedger::new(3);
        let handle = submit_publish(&ledger).await;
        let watcher = ConfirmationWatcher::new(Arc::new(ledger), policy(10));

        let settlement = watcher.wait(handle, &CancellationToken::new()).await;
        assert!(matches!(settlement, Settlement::Confirmed(Receipt { created: Some(_), .. })));
    }

    #[tokio::test]
    async fn test_wait_times_out_after_max_attempts() {
        let ledger = DevLedger::new(1);
        ledger.set_stalled(true).await;
        let handle = submit_publish(&ledger).await;
        let watcher = ConfirmationWatcher::new(Arc::new(ledger), policy(4));

        let settlement = watcher.wait(handle, &CancellationToken::new()).await;
        assert!(matches!(settlement, Settlement::TimedOut { attempts: 4, .. }));
        assert!(matches!(
            settlement.into_result(handle),
            Err(MarketError::Timeout { attempts: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_respects_wall_clock_deadline() {
        let ledger = DevLedger::new(1);
        ledger.set_stalled(true).await;
        let handle = submit_publish(&ledger).await;
        let policy = ConfirmationPolicy {
            poll_interval: Duration::from_millis(5),
            max_attempts: u32::MAX,
            deadline: Duration::from_millis(30),
        };
        let watcher = ConfirmationWatcher::new(Arc::new(ledger), policy);

        let settlement = watcher.wait(handle, &CancellationToken::new()).await;
        assert!(matches!(settlement, Settlement::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_wait_leaves_operation_pending() {
        let ledger = DevLedger::new(1);
        ledger.set_stalled(true).await;
        let handle = submit_publish(&ledger).await;
        let watcher = ConfirmationWatcher::new(Arc::new(ledger.clone()), policy(1_000));

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(watcher.wait(handle, &cancel).await, Settlement::Cancelled);

        ledger.set_stalled(false).await;
        assert!(ledger.observe(handle).await.unwrap().is_terminal());
    }
}
