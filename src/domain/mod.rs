//! Domain layer: ledger entities, value objects and the ports the
//! application layer drives.

pub mod account;
pub mod card;
pub mod events;
pub mod hold;
pub mod idempotency;
pub mod ids;
pub mod money;
pub mod payment;
pub mod ports;
