use super::ids::PaymentId;
use super::payment::PaymentState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Emitted on every payment state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub payment_id: PaymentId,
    pub new_state: PaymentState,
    pub at: DateTime<Utc>,
}

/// Answer of the clearing network to a submitted payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ClearingResponse {
    Settled,
    Rejected(String),
    /// Settlement will be confirmed later through `on_clearing_result`.
    Deferred,
}

/// Asynchronous settlement confirmation from the clearing network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ClearingOutcome {
    Settled,
    Rejected(String),
}
