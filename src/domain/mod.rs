//! Domain types and ports.
//!
//! Everything here is free of I/O: addresses and amounts, ledger operations,
//! the purchase state machine, and the traits the application layer drives.

pub mod address;
pub mod amount;
pub mod listing;
pub mod operation;
pub mod ports;
pub mod workflow;
