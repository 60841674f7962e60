use crate::domain::ports::WorkflowStore;
use crate::domain::workflow::{PurchaseWorkflow, WorkflowId};
use crate::error::{MarketError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::Arc;

/// Column Family for storing workflow records.
pub const CF_WORKFLOWS: &str = "workflows";

/// A persistent workflow store backed by RocksDB.
///
/// Records are JSON-encoded and keyed by the big-endian workflow id, so
/// iteration yields them in id order.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the "workflows" column family exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_workflows = ColumnFamilyDescriptor::new(CF_WORKFLOWS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_workflows])?;

        Ok(Self { db: Arc::new(db) })
    }

    fn missing_cf() -> MarketError {
        MarketError::InternalError(Box::new(std::io::Error::other(
            "Workflows column family not found",
        )))
    }
}

#[async_trait]
impl WorkflowStore for RocksDBStore {
    async fn store(&self, workflow: PurchaseWorkflow) -> Result<()> {
        let cf = self.db.cf_handle(CF_WORKFLOWS).ok_or_else(Self::missing_cf)?;

        let key = workflow.id.0.to_be_bytes();
        let value = serde_json::to_vec(&workflow).map_err(|e| {
            MarketError::InternalError(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Serialization error: {}", e),
            )))
        })?;

        self.db.put_cf(&cf, key, value)?;
        Ok(())
    }

    async fn get(&self, id: WorkflowId) -> Result<Option<PurchaseWorkflow>> {
        let cf = self.db.cf_handle(CF_WORKFLOWS).ok_or_else(Self::missing_cf)?;

        let Some(bytes) = self.db.get_cf(&cf, id.0.to_be_bytes())? else {
            return Ok(None);
        };
        let workflow = serde_json::from_slice(&bytes).map_err(|e| {
            MarketError::InternalError(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Deserialization error: {}", e),
            )))
        })?;
        Ok(Some(workflow))
    }

    async fn get_all(&self) -> Result<Vec<PurchaseWorkflow>> {
        let cf = self.db.cf_handle(CF_WORKFLOWS).ok_or_else(Self::missing_cf)?;

        let mut workflows = Vec::new();
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            let workflow: PurchaseWorkflow = serde_json::from_slice(&value).map_err(|e| {
                MarketError::InternalError(Box::new(std::io::Error::other(format!(
                    "Failed to deserialize workflow: {}",
                    e
                ))))
            })?;
            workflows.push(workflow);
        }
        Ok(workflows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::address::Address;
    use crate::domain::amount::Quantity;
    use crate::domain::listing::AssetListing;
    use crate::domain::workflow::{FailureReason, PurchaseIntent, WorkflowState};
    use tempfile::tempdir;

    fn workflow(id: u64) -> PurchaseWorkflow {
        let listing = AssetListing::demo(Address::from_low_u64(2), Address::from_low_u64(1)).unwrap();
        let intent = PurchaseIntent::new(Address::from_low_u64(10), listing, Quantity::ONE);
        PurchaseWorkflow::new(WorkflowId(id), intent).unwrap()
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");
        assert!(store.db.cf_handle(CF_WORKFLOWS).is_some());
    }

    #[tokio::test]
    async fn test_rocksdb_workflow_store() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let mut wf = workflow(7);
        wf.fail(FailureReason::NotEligible).unwrap();
        store.store(wf.clone()).await.unwrap();

        let retrieved = store.get(WorkflowId(7)).await.unwrap().unwrap();
        assert_eq!(retrieved, wf);
        assert!(matches!(retrieved.state, WorkflowState::Failed { .. }));
        assert!(store.get(WorkflowId(8)).await.unwrap().is_none());

        store.store(workflow(2)).await.unwrap();
        let ids: Vec<u64> = store.get_all().await.unwrap().iter().map(|w| w.id.0).collect();
        assert_eq!(ids, vec![2, 7]);
    }
}
