//! Orchestration of the ledger core.
//!
//! Every balance mutation runs under the owning account's lock through
//! [`coordinator::LedgerCoordinator`]; the engines and processors above it
//! only decide what to reserve, capture, release or credit.

pub mod authorization;
pub mod coordinator;
pub mod idempotency;
pub mod ledger;
pub mod locks;
pub mod payments;
pub mod reconciler;
pub mod service;
