use super::ids::{AccountId, BatchId, CardId, HoldId, PaymentId};
use super::money::{Amount, Currency};
use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The payment instruments the core moves money with.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum Instrument {
    Card,
    InstantTransfer,
    ScheduledTransfer,
    Wire,
    Invoice,
    BatchItem,
}

impl Instrument {
    /// Instant instruments may settle inline when clearing answers synchronously.
    pub fn is_instant(&self) -> bool {
        matches!(self, Self::Card | Self::InstantTransfer | Self::BatchItem)
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Created,
    Pending,
    Processing,
    Completed,
    Failed,
    RefundPending,
    Refunded,
}

impl PaymentState {
    /// States reachable from `self` in one step.
    pub fn successors(&self) -> &'static [PaymentState] {
        use PaymentState::*;
        match self {
            Created => &[Pending],
            Pending => &[Processing, Failed],
            Processing => &[Completed, Failed],
            Completed => &[RefundPending],
            RefundPending => &[Refunded, Completed],
            Failed | Refunded => &[],
        }
    }

    pub fn can_transition(&self, to: PaymentState) -> bool {
        self.successors().contains(&to)
    }

    pub fn is_terminal(&self) -> bool {
        self.successors().is_empty()
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RefundPending => "refund_pending",
            Self::Refunded => "refunded",
        };
        f.write_str(name)
    }
}

/// A payment instruction and its lifecycle.
///
/// The amount never changes after creation; only `state`, `completed_at` and
/// the linkage fields move as the payment progresses.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
pub struct Payment {
    pub id: PaymentId,
    pub source: AccountId,
    /// `None` for destinations outside the ledger.
    pub destination: Option<AccountId>,
    pub card: Option<CardId>,
    amount: Amount,
    pub currency: Currency,
    pub instrument: Instrument,
    pub state: PaymentState,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub idempotency_key: String,
    pub batch_id: Option<BatchId>,
    pub hold_id: Option<HoldId>,
    /// Set on reversal records: the payment being refunded.
    pub reversal_of: Option<PaymentId>,
    /// Set on refunded payments: the reversal record.
    pub refunded_by: Option<PaymentId>,
    pub failure_reason: Option<String>,
    pub version: u64,
}

impl Payment {
    pub fn new(
        source: AccountId,
        amount: Amount,
        currency: Currency,
        instrument: Instrument,
        idempotency_key: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            source,
            destination: None,
            card: None,
            amount,
            currency,
            instrument,
            state: PaymentState::Created,
            metadata: BTreeMap::new(),
            created_at: now,
            completed_at: None,
            idempotency_key: idempotency_key.into(),
            batch_id: None,
            hold_id: None,
            reversal_of: None,
            refunded_by: None,
            failure_reason: None,
            version: 0,
        }
    }

    /// Builds the completed reversal record of a refunded payment.
    ///
    /// Funds flow back to the original source for the original amount.
    pub fn reversal(original: &Payment, now: DateTime<Utc>) -> Self {
        let mut reversal = Self::new(
            original.destination.unwrap_or(original.source),
            original.amount,
            original.currency.clone(),
            original.instrument,
            format!("{}:refund", original.idempotency_key),
            now,
        );
        reversal.destination = Some(original.source);
        reversal.reversal_of = Some(original.id);
        reversal.batch_id = original.batch_id;
        reversal.state = PaymentState::Completed;
        reversal.completed_at = Some(now);
        reversal
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    /// Moves the payment to `to`, refusing edges the lifecycle does not allow.
    pub fn transition(&mut self, to: PaymentState, now: DateTime<Utc>) -> Result<(), PaymentError> {
        if !self.state.can_transition(to) {
            return Err(PaymentError::InvalidTransition(format!(
                "payment {} cannot move from {} to {}",
                self.id, self.state, to
            )));
        }
        self.state = to;
        if to == PaymentState::Completed && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), PaymentError> {
        self.transition(PaymentState::Failed, now)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }
}
