use crate::domain::ports::WorkflowStore;
use crate::domain::workflow::{PurchaseWorkflow, WorkflowId};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory store for workflow records.
///
/// Uses `Arc<RwLock<HashMap<WorkflowId, PurchaseWorkflow>>>` so clones share
/// the same records. Records are lost when the process exits.
#[derive(Default, Clone)]
pub struct InMemoryWorkflowStore {
    workflows: Arc<RwLock<HashMap<WorkflowId, PurchaseWorkflow>>>,
}

impl InMemoryWorkflowStore {
    /// Creates a new, empty in-memory workflow store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn store(&self, workflow: PurchaseWorkflow) -> Result<()> {
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.id, workflow);
        Ok(())
    }

    async fn get(&self, id: WorkflowId) -> Result<Option<PurchaseWorkflow>> {
        let workflows = self.workflows.read().await;
        Ok(workflows.get(&id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<PurchaseWorkflow>> {
        let workflows = self.workflows.read().await;
        let mut all: Vec<_> = workflows.values().cloned().collect();
        all.sort_by_key(|wf| wf.id);
        Ok(all)
    }
}
