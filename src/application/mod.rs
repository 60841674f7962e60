//! Application layer: drives purchase workflows and deployments against the
//! ledger ports.
//!
//! `PurchaseOrchestrator` is the entry point for buyer-facing intents. Every
//! submission goes through a `SubmissionSequencer` and is settled by a
//! `ConfirmationWatcher` before the next step runs.

pub mod confirmation;
pub mod deployment;
pub mod eligibility;
pub mod orchestrator;
pub mod presenter;
pub mod sequencer;
