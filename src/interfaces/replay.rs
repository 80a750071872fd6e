use super::csv::journal_reader::{JournalRecord, Operation};
use crate::application::authorization::{AuthorizationRequest, FundingSource};
use crate::application::payments::PaymentRequest;
use crate::application::service::BankingCore;
use crate::domain::account::Account;
use crate::domain::events::ClearingOutcome;
use crate::domain::ids::{AccountId, CardId, HoldId, PaymentId};
use crate::domain::money::Currency;
use crate::domain::payment::Instrument;
use crate::error::{PaymentError, Result};
use std::collections::HashMap;

/// Applies journal rows to a [`BankingCore`].
///
/// Rows refer to earlier authorizations and payments by their `key`; the
/// replayer remembers which hold or payment each key produced.
pub struct Replayer {
    core: BankingCore,
    holds: HashMap<String, HoldId>,
    payments: HashMap<String, PaymentId>,
}

impl Replayer {
    pub fn new(core: BankingCore) -> Self {
        Self {
            core,
            holds: HashMap::new(),
            payments: HashMap::new(),
        }
    }

    pub fn core(&self) -> &BankingCore {
        &self.core
    }

    pub async fn accounts(&self) -> Result<Vec<Account>> {
        self.core.accounts().await
    }

    pub async fn apply(&mut self, record: &JournalRecord) -> Result<()> {
        match record.op {
            Operation::Open => {
                let currency = record.currency.as_deref().map(Currency::new).transpose()?;
                self.core
                    .open_account(AccountId(record.require(record.account, "account")?), currency)
                    .await?;
            }
            Operation::Deposit => {
                let id = AccountId(record.require(record.account, "account")?);
                let currency = self.core.account(id).await?.currency;
                self.core.deposit(id, record.minor_amount(&currency)?).await?;
            }
            Operation::Card => {
                let account = AccountId(record.require(record.account, "account")?);
                let currency = self.core.account(account).await?.currency;
                let card = CardId(record.require(record.card, "card")?);
                self.core
                    .issue_card(card, account, record.minor_amount(&currency)?)
                    .await?;
            }
            Operation::Limit => {
                let card = self.core.card(CardId(record.require(record.card, "card")?)).await?;
                let currency = self.core.account(card.account).await?.currency;
                self.core
                    .set_card_limit(card.id, record.minor_amount(&currency)?)
                    .await?;
            }
            Operation::Block | Operation::Unblock => self.toggle(record).await?,
            Operation::Authorize => {
                let card = self.core.card(CardId(record.require(record.card, "card")?)).await?;
                let currency = self.core.account(card.account).await?.currency;
                let key = record.require_key()?.to_string();
                let auth = self
                    .core
                    .authorize(AuthorizationRequest {
                        source: FundingSource::Card(card.id),
                        amount: record.minor_amount(&currency)?,
                        idempotency_key: key.clone(),
                    })
                    .await?;
                self.holds.insert(key, auth.hold_id);
            }
            Operation::Capture => {
                self.core.capture_authorization(self.hold(record)?).await?;
            }
            Operation::Release => {
                self.core.release_authorization(self.hold(record)?).await?;
            }
            Operation::Pay => self.pay(record).await?,
            Operation::Settle => {
                self.core
                    .on_clearing_result(self.payment(record)?, ClearingOutcome::Settled)
                    .await?;
            }
            Operation::Reject => {
                let reason = record.reason.clone().unwrap_or_else(|| "REJECTED".to_string());
                self.core
                    .on_clearing_result(self.payment(record)?, ClearingOutcome::Rejected(reason))
                    .await?;
            }
            Operation::Refund => {
                self.core.refund(self.payment(record)?).await?;
            }
            Operation::Sweep => {
                let report = self.core.sweep().await?;
                tracing::debug!(?report, "journal sweep");
            }
        }
        Ok(())
    }

    async fn toggle(&self, record: &JournalRecord) -> Result<()> {
        let block = record.op == Operation::Block;
        match (record.card, record.account) {
            (Some(card), _) if block => self.core.block_card(CardId(card)).await.map(drop),
            (Some(card), _) => self.core.unblock_card(CardId(card)).await.map(drop),
            (None, Some(account)) if block => self.core.block_account(AccountId(account)).await.map(drop),
            (None, Some(account)) => self.core.unblock_account(AccountId(account)).await.map(drop),
            (None, None) => Err(PaymentError::ValidationError(format!(
                "{:?} row names neither a card nor an account",
                record.op
            ))),
        }
    }

    /// A denied payment is reported as an error so the row shows up on stderr.
    async fn pay(&mut self, record: &JournalRecord) -> Result<()> {
        let source = AccountId(record.require(record.account, "account")?);
        let currency = self.core.account(source).await?.currency;
        let key = record.require_key()?.to_string();
        let instrument = match (record.instrument, record.card) {
            (Some(instrument), _) => instrument,
            (None, Some(_)) => Instrument::Card,
            (None, None) => Instrument::InstantTransfer,
        };

        let mut request = PaymentRequest::new(
            source,
            record.minor_amount(&currency)?,
            currency,
            instrument,
            key.clone(),
        );
        request.destination = record.destination.map(AccountId);
        request.card = record.card.map(CardId);

        let payment = self.core.pay(request).await?;
        self.payments.insert(key, payment.id);
        match payment.failure_reason {
            Some(reason) => Err(PaymentError::ValidationError(format!(
                "payment {} failed: {reason}",
                payment.id
            ))),
            None => Ok(()),
        }
    }

    fn hold(&self, record: &JournalRecord) -> Result<HoldId> {
        let key = record.require_key()?;
        self.holds
            .get(key)
            .copied()
            .ok_or_else(|| PaymentError::NotFound(format!("authorization {key}")))
    }

    fn payment(&self, record: &JournalRecord) -> Result<PaymentId> {
        let key = record.require_key()?;
        self.payments
            .get(key)
            .copied()
            .ok_or_else(|| PaymentError::NotFound(format!("payment {key}")))
    }
}
