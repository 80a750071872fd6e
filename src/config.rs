use crate::domain::money::Currency;
use crate::error::Result;
use chrono::Duration;

/// Tunables of the ledger core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Currency of accounts opened without an explicit one.
    pub currency: Currency,
    /// Lifetime of a card authorization before it is released.
    pub card_hold_ttl: Duration,
    /// Lifetime of a payment debit awaiting settlement.
    pub payment_hold_ttl: Duration,
    /// How long a completed idempotency key keeps answering retries.
    pub idempotency_retention: Duration,
    /// Version-conflict retries before `Contention` is reported.
    pub max_retries: u32,
    /// Period of the background expiry sweep.
    pub sweep_interval: std::time::Duration,
}

impl LedgerConfig {
    pub fn with_currency(code: &str) -> Result<Self> {
        Ok(Self {
            currency: Currency::new(code)?,
            ..Self::default()
        })
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            currency: Currency::brl(),
            card_hold_ttl: Duration::days(7),
            payment_hold_ttl: Duration::days(3),
            idempotency_retention: Duration::hours(24),
            max_retries: 5,
            sweep_interval: std::time::Duration::from_secs(60),
        }
    }
}
