use crate::domain::address::{Address, TxHash};
use crate::domain::operation::{Operation, SubmissionError};
use crate::domain::ports::LedgerClient;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::warn;

type Lanes = Mutex<HashMap<Address, Arc<tokio::sync::Mutex<()>>>>;

/// Serializes submissions per sender and stamps each with a fresh sequence
/// number read from the ledger.
#[derive(Default)]
pub struct SubmissionSequencer {
    lanes: Lanes,
}

/// Exclusive use of one sender's lane. The lane is removed from the map when
/// its last turn ends.
struct Turn<'a> {
    sender: Address,
    guard: Option<OwnedMutexGuard<()>>,
    lanes: &'a Lanes,
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        self.guard.take();
        if lanes
            .get(&self.sender)
            .is_some_and(|lane| Arc::strong_count(lane) == 1)
        {
            lanes.remove(&self.sender);
        }
    }
}

impl SubmissionSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    async fn turn(&self, sender: Address) -> Turn<'_> {
        let lane = {
            let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
            lanes.entry(sender).or_default().clone()
        };
        Turn {
            sender,
            guard: Some(lane.lock_owned().await),
            lanes: &self.lanes,
        }
    }

    #[cfg(test)]
    fn lane_count(&self) -> usize {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Submits once; any admission error is returned as is.
    pub async fn submit_once(
        &self,
        ledger: &dyn LedgerClient,
        operation: Operation,
    ) -> Result<TxHash, SubmissionError> {
        let _turn = self.turn(operation.sender).await;
        Self::sequenced_submit(ledger, &operation).await
    }

    /// Submits, retrying a single time with a fresh sequence number when the
    /// first admission error is transient.
    pub async fn submit_with_retry(
        &self,
        ledger: &dyn LedgerClient,
        operation: Operation,
    ) -> Result<TxHash, SubmissionError> {
        let _turn = self.turn(operation.sender).await;

        match Self::sequenced_submit(ledger, &operation).await {
            Err(error) if error.is_transient() => {
                warn!(
                    sender = %operation.sender,
                    kind = %operation.kind(),
                    %error,
                    "transient submission error, retrying once"
                );
                Self::sequenced_submit(ledger, &operation).await
            }
            other => other,
        }
    }

    async fn sequenced_submit(
        ledger: &dyn LedgerClient,
        operation: &Operation,
    ) -> Result<TxHash, SubmissionError> {
        let nonce = ledger
            .next_sequence(operation.sender)
            .await
            .map_err(|e| SubmissionError::Unavailable(e.to_string()))?;
        ledger.submit(operation.clone().with_nonce(nonce)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::operation::ProgramSpec;
    use crate::infrastructure::dev_ledger::DevLedger;

    const DEPLOYER: Address = Address::from_low_u64(1);

    #[tokio::test]
    async fn test_retry_recovers_from_one_nonce_conflict() {
        let ledger = DevLedger::new(1);
        ledger
            .fail_next_submission(SubmissionError::NonceConflict {
                expected: 1,
                provided: 0,
            })
            .await;
        let sequencer = SubmissionSequencer::new();

        let op = Operation::publish(DEPLOYER, ProgramSpec::Payment);
        assert!(sequencer.submit_with_retry(&ledger, op).await.is_ok());
        assert_eq!(ledger.submissions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_second_failure() {
        let ledger = DevLedger::new(1);
        for _ in 0..2 {
            ledger
                .fail_next_submission(SubmissionError::Unavailable("busy".to_string()))
                .await;
        }
        let sequencer = SubmissionSequencer::new();

        let op = Operation::publish(DEPLOYER, ProgramSpec::Payment);
        let err = sequencer.submit_with_retry(&ledger, op).await.unwrap_err();
        assert_eq!(err, SubmissionError::Unavailable("busy".to_string()));
        assert!(ledger.submissions().await.is_empty());
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let ledger = DevLedger::new(1);
        ledger
            .fail_next_submission(SubmissionError::InsufficientFee)
            .await;
        let sequencer = SubmissionSequencer::new();

        let op = Operation::publish(DEPLOYER, ProgramSpec::Payment);
        let err = sequencer.submit_with_retry(&ledger, op).await.unwrap_err();
        assert_eq!(err, SubmissionError::InsufficientFee);
        // The queue is drained, so a later submission goes through.
        let op = Operation::publish(DEPLOYER, ProgramSpec::Payment);
        assert!(sequencer.submit_once(&ledger, op).await.is_ok());
    }

    #[tokio::test]
    async fn test_sequence_numbers_advance_per_sender() {
        let ledger = DevLedger::new(1);
        let sequencer = SubmissionSequencer::new();
        for _ in 0..3 {
            let op = Operation::publish(DEPLOYER, ProgramSpec::Payment);
            sequencer.submit_once(&ledger, op).await.unwrap();
        }
        let nonces: Vec<u64> = ledger.submissions().await.iter().map(|op| op.nonce).collect();
        assert_eq!(nonces, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_lanes_are_dropped_once_idle() {
        let ledger = DevLedger::new(1);
        let sequencer = SubmissionSequencer::new();
        let other = Address::from_low_u64(2);

        let (first, second, third) = tokio::join!(
            sequencer.submit_once(&ledger, Operation::publish(DEPLOYER, ProgramSpec::Payment)),
            sequencer.submit_with_retry(&ledger, Operation::publish(DEPLOYER, ProgramSpec::Payment)),
            sequencer.submit_once(&ledger, Operation::publish(other, ProgramSpec::Payment)),
        );
        assert!(first.is_ok() && second.is_ok() && third.is_ok());
        assert_eq!(ledger.submissions().await.len(), 3);
        assert_eq!(sequencer.lane_count(), 0);
    }
}
