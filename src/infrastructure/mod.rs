//! Adapters implementing the domain ports.

pub mod dev_ledger;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
