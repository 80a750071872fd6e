use super::ids::{AccountId, CardId, HoldId, PaymentId};
use super::money::Amount;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    CardAuthorization,
    PaymentDebit,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HoldState {
    Active,
    Released,
    Captured,
}

/// A reservation of funds against an account's available balance.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Hold {
    pub id: HoldId,
    pub account: AccountId,
    /// Card whose spent-in-period was charged for this hold, if any.
    pub card: Option<CardId>,
    /// Payment backed by this hold, if any.
    pub payment: Option<PaymentId>,
    pub amount: Amount,
    pub reason: HoldReason,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: HoldState,
    /// When the hold left `Active`.
    pub closed_at: Option<DateTime<Utc>>,
}

impl Hold {
    pub fn new(
        account: AccountId,
        amount: Amount,
        reason: HoldReason,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: HoldId::new(),
            account,
            card: None,
            payment: None,
            amount,
            reason,
            created_at: now,
            expires_at: now + ttl,
            state: HoldState::Active,
            closed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == HoldState::Active
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && now >= self.expires_at
    }

    /// True when the hold was released by running past its expiry.
    pub fn lapsed(&self) -> bool {
        self.state == HoldState::Released
            && self.closed_at.is_some_and(|closed| closed >= self.expires_at)
    }

    pub fn close(&mut self, state: HoldState, now: DateTime<Utc>) {
        self.state = state;
        self.closed_at = Some(now);
    }
}
