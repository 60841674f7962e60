use rwa_market::application::eligibility::{PrivilegedSubmitters, SelfService};
use rwa_market::domain::address::Address;
use rwa_market::domain::amount::Quantity;
use rwa_market::domain::listing::AssetListing;
use rwa_market::domain::operation::{Operation, ProgramSpec};
use rwa_market::domain::ports::{
    AccountStateReaderRef, EligibilityAuthorityBox, LedgerClientRef, WorkflowStoreBox,
};
use rwa_market::domain::workflow::{PurchaseIntent, PurchaseWorkflow, WorkflowId};
use rwa_market::infrastructure::dev_ledger::{DEV_BUYER, DEV_DEPLOYER, DevLedger};
use rwa_market::infrastructure::in_memory::InMemoryWorkflowStore;
use std::sync::Arc;

#[tokio::test]
async fn test_ports_as_trait_objects() {
    let ledger = DevLedger::new(1);
    let client: LedgerClientRef = Arc::new(ledger.clone());
    let reader: AccountStateReaderRef = Arc::new(ledger);
    let store: WorkflowStoreBox = Box::new(InMemoryWorkflowStore::new());

    // Verify Send + Sync by spawning tasks
    let submit = tokio::spawn(async move {
        let handle = client
            .submit(Operation::publish(DEV_DEPLOYER, ProgramSpec::Payment))
            .await
            .unwrap();
        client.observe(handle).await.unwrap()
    });
    let status = submit.await.unwrap();
    assert!(status.is_terminal());

    let read = tokio::spawn(async move {
        reader
            .balance_of(Address::from_low_u64(0xdead), DEV_BUYER)
            .await
    });
    assert!(read.await.unwrap().is_err());

    let listing = AssetListing::demo(Address::from_low_u64(3), Address::from_low_u64(4)).unwrap();
    let workflow =
        PurchaseWorkflow::new(WorkflowId(1), PurchaseIntent::new(DEV_BUYER, listing, Quantity::ONE))
            .unwrap();
    let stored = tokio::spawn(async move {
        store.store(workflow).await.unwrap();
        store.get(WorkflowId(1)).await.unwrap().unwrap()
    });
    assert_eq!(stored.await.unwrap().id, WorkflowId(1));
}

#[test]
fn test_authorities_as_trait_objects() {
    let authorities: Vec<EligibilityAuthorityBox> = vec![
        Box::new(SelfService),
        Box::new(PrivilegedSubmitters::new([DEV_DEPLOYER])),
    ];
    assert!(authorities[0].may_grant(DEV_BUYER, DEV_BUYER));
    assert!(!authorities[1].may_grant(DEV_BUYER, DEV_BUYER));
    assert!(authorities[1].may_grant(DEV_DEPLOYER, DEV_BUYER));
}
