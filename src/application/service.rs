use super::authorization::{Authorization, AuthorizationEngine, AuthorizationRequest};
use super::coordinator::LedgerCoordinator;
use super::idempotency::IdempotencyGuard;
use super::payments::{BatchRequest, BatchResult, PaymentProcessor, PaymentRequest, Refund};
use super::reconciler::{Reconciler, SweepReport};
use crate::config::LedgerConfig;
use crate::domain::account::{Account, AccountStatus};
use crate::domain::card::{Card, CardStatus};
use crate::domain::events::ClearingOutcome;
use crate::domain::hold::Hold;
use crate::domain::ids::{AccountId, BatchId, CardId, HoldId, PaymentId};
use crate::domain::money::{Amount, Balance, Currency};
use crate::domain::payment::Payment;
use crate::domain::ports::{CardStoreRef, ClearingGatewayRef, ClockRef, EventSinkRef, Stores};
use crate::error::Result;
use crate::infrastructure::clearing::InlineClearing;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::notifier::LogNotifier;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Entry point wiring the coordinator, authorization engine, payment
/// processor and reconciler over one set of stores.
pub struct BankingCore {
    config: LedgerConfig,
    coordinator: Arc<LedgerCoordinator>,
    engine: Arc<AuthorizationEngine>,
    processor: Arc<PaymentProcessor>,
    reconciler: Arc<Reconciler>,
    cards: CardStoreRef,
}

impl BankingCore {
    pub fn new(
        stores: Stores,
        config: LedgerConfig,
        clearing: ClearingGatewayRef,
        events: EventSinkRef,
        clock: ClockRef,
    ) -> Self {
        let coordinator = Arc::new(LedgerCoordinator::new(
            &stores,
            clock.clone(),
            config.max_retries,
        ));
        let idempotency = Arc::new(IdempotencyGuard::new(
            stores.idempotency.clone(),
            clock,
            config.idempotency_retention,
        ));
        let engine = Arc::new(AuthorizationEngine::new(
            coordinator.clone(),
            idempotency.clone(),
            config.card_hold_ttl,
        ));
        let processor = Arc::new(PaymentProcessor::new(
            coordinator.clone(),
            engine.clone(),
            idempotency.clone(),
            stores.payments.clone(),
            clearing,
            events,
            config.payment_hold_ttl,
        ));
        let reconciler = Arc::new(Reconciler::new(
            coordinator.clone(),
            processor.clone(),
            idempotency,
        ));

        Self {
            config,
            coordinator,
            engine,
            processor,
            reconciler,
            cards: stores.cards,
        }
    }

    /// In-memory stores, inline clearing, log notifications and wall-clock time.
    pub fn in_memory(config: LedgerConfig) -> Self {
        Self::new(
            Stores::in_memory(),
            config,
            Arc::new(InlineClearing),
            Arc::new(LogNotifier),
            Arc::new(SystemClock),
        )
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Direct access to per-account locking for custom balance operations.
    pub fn coordinator(&self) -> &Arc<LedgerCoordinator> {
        &self.coordinator
    }

    // Accounts

    /// Opens an empty account, in the configured currency unless one is given.
    pub async fn open_account(&self, id: AccountId, currency: Option<Currency>) -> Result<Account> {
        let account = Account::new(id, currency.unwrap_or_else(|| self.config.currency.clone()));
        self.coordinator.open_account(account.clone()).await?;
        Ok(account)
    }

    pub async fn deposit(&self, id: AccountId, amount: Amount) -> Result<Account> {
        self.coordinator
            .with_account_lock(id, move |ledger| {
                Box::pin(async move { ledger.credit(amount).await })
            })
            .await
    }

    pub async fn block_account(&self, id: AccountId) -> Result<Account> {
        self.set_account_status(id, AccountStatus::Blocked).await
    }

    pub async fn unblock_account(&self, id: AccountId) -> Result<Account> {
        self.set_account_status(id, AccountStatus::Active).await
    }

    pub async fn account(&self, id: AccountId) -> Result<Account> {
        self.coordinator.account(id).await
    }

    pub async fn accounts(&self) -> Result<Vec<Account>> {
        self.coordinator.accounts().await
    }

    async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> Result<Account> {
        tracing::info!(account = %id, ?status, "changing account status");
        self.coordinator
            .with_account_lock(id, move |ledger| {
                Box::pin(async move {
                    ledger
                        .update_account(|account| {
                            account.status = status;
                            Ok(())
                        })
                        .await
                })
            })
            .await
    }

    // Cards

    pub async fn issue_card(&self, id: CardId, account: AccountId, limit: Amount) -> Result<Card> {
        let card = Card::new(id, account, limit);
        self.coordinator.issue_card(card.clone()).await?;
        Ok(card)
    }

    /// Replaces the period limit. A limit below the current spend is accepted
    /// and denies further authorizations until the period resets.
    pub async fn set_card_limit(&self, id: CardId, limit: Amount) -> Result<Card> {
        let limit = Balance::from(limit);
        self.update_card(id, move |card| card.limit = limit).await
    }

    pub async fn block_card(&self, id: CardId) -> Result<Card> {
        self.update_card(id, |card| card.status = CardStatus::Blocked)
            .await
    }

    pub async fn unblock_card(&self, id: CardId) -> Result<Card> {
        self.update_card(id, |card| card.status = CardStatus::Active)
            .await
    }

    /// Starts a new spending period.
    pub async fn reset_card_period(&self, id: CardId) -> Result<Card> {
        self.update_card(id, |card| card.spent = Balance::ZERO).await
    }

    pub async fn card(&self, id: CardId) -> Result<Card> {
        self.coordinator.card(id).await
    }

    pub async fn cards_for_account(&self, account: AccountId) -> Result<Vec<Card>> {
        self.cards.by_account(account).await
    }

    async fn update_card<F>(&self, id: CardId, change: F) -> Result<Card>
    where
        F: Fn(&mut Card) + Send + Sync + 'static,
    {
        let account = self.coordinator.card(id).await?.account;
        tracing::info!(card = %id, account = %account, "updating card");
        self.coordinator
            .with_account_lock(account, move |ledger| {
                Box::pin(async move {
                    ledger
                        .update_card(id, |card| {
                            change(card);
                            Ok(())
                        })
                        .await
                })
            })
            .await
    }

    // Authorizations

    pub async fn authorize(&self, request: AuthorizationRequest) -> Result<Authorization> {
        self.engine.authorize(request).await
    }

    pub async fn capture_authorization(&self, hold: HoldId) -> Result<Hold> {
        self.engine.capture(hold).await
    }

    pub async fn release_authorization(&self, hold: HoldId) -> Result<Hold> {
        self.engine.release(hold).await
    }

    pub async fn hold(&self, id: HoldId) -> Result<Hold> {
        self.coordinator.hold(id).await
    }

    // Payments

    pub async fn pay(&self, request: PaymentRequest) -> Result<Payment> {
        self.processor.submit(request).await
    }

    pub async fn on_clearing_result(&self, id: PaymentId, outcome: ClearingOutcome) -> Result<Payment> {
        self.processor.on_clearing_result(id, outcome).await
    }

    pub async fn refund(&self, id: PaymentId) -> Result<Refund> {
        self.processor.refund(id).await
    }

    pub async fn submit_batch(&self, request: BatchRequest) -> Result<BatchResult> {
        self.processor.submit_batch(request).await
    }

    pub async fn payment(&self, id: PaymentId) -> Result<Payment> {
        self.processor.payment(id).await
    }

    pub async fn batch(&self, id: BatchId) -> Result<Vec<Payment>> {
        self.processor.batch(id).await
    }

    // Maintenance

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.reconciler.run_once().await
    }

    /// Starts the periodic expiry sweep at the configured interval.
    pub fn spawn_reconciler(&self) -> JoinHandle<()> {
        Arc::clone(&self.reconciler).spawn(self.config.sweep_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::authorization::FundingSource;
    use crate::domain::payment::Instrument;
    use crate::error::PaymentError;

    async fn core_with_card() -> BankingCore {
        let core = BankingCore::in_memory(LedgerConfig::default());
        core.open_account(AccountId(1), None).await.unwrap();
        core.deposit(AccountId(1), Amount::new(50_000).unwrap())
            .await
            .unwrap();
        core.issue_card(CardId(3), AccountId(1), Amount::new(1_000).unwrap())
            .await
            .unwrap();
        core
    }

    fn card_auth(amount: i64, key: &str) -> AuthorizationRequest {
        AuthorizationRequest {
            source: FundingSource::Card(CardId(3)),
            amount: Amount::new(amount).unwrap(),
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_open_account_uses_configured_currency() {
        let core = BankingCore::in_memory(LedgerConfig::with_currency("USD").unwrap());
        let account = core.open_account(AccountId(9), None).await.unwrap();
        assert_eq!(account.currency.code(), "USD");
        let eur = core
            .open_account(AccountId(10), Some(Currency::new("EUR").unwrap()))
            .await
            .unwrap();
        assert_eq!(eur.currency.code(), "EUR");
        assert!(core.open_account(AccountId(9), None).await.is_err());
    }

    #[tokio::test]
    async fn test_blocked_account_denies_debits_but_accepts_credits() {
        let core = core_with_card().await;
        core.block_account(AccountId(1)).await.unwrap();
        assert!(matches!(
            core.authorize(card_auth(10, "k1")).await,
            Err(PaymentError::AccountBlocked(_))
        ));
        core.deposit(AccountId(1), Amount::new(5).unwrap())
            .await
            .unwrap();

        core.unblock_account(AccountId(1)).await.unwrap();
        core.authorize(card_auth(10, "k1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_card_administration() {
        let core = core_with_card().await;
        core.authorize(card_auth(900, "k1")).await.unwrap();

        let card = core.set_card_limit(CardId(3), Amount::new(500).unwrap()).await.unwrap();
        assert_eq!(card.remaining(), Balance::ZERO);
        assert!(matches!(
            core.authorize(card_auth(1, "k2")).await,
            Err(PaymentError::LimitExceeded { .. })
        ));

        core.reset_card_period(CardId(3)).await.unwrap();
        core.authorize(card_auth(400, "k3")).await.unwrap();

        core.block_card(CardId(3)).await.unwrap();
        assert!(matches!(
            core.authorize(card_auth(1, "k4")).await,
            Err(PaymentError::CardBlocked(_))
        ));
        core.unblock_card(CardId(3)).await.unwrap();
        core.authorize(card_auth(1, "k4")).await.unwrap();
    }

    #[tokio::test]
    async fn test_cards_for_account() {
        let core = core_with_card().await;
        core.issue_card(CardId(4), AccountId(1), Amount::new(10).unwrap())
            .await
            .unwrap();
        let ids: Vec<CardId> = core
            .cards_for_account(AccountId(1))
            .await
            .unwrap()
            .into_iter()
            .map(|card| card.id)
            .collect();
        assert_eq!(ids, vec![CardId(3), CardId(4)]);
        assert!(core.cards_for_account(AccountId(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wire_hold_stays_with_its_payment() {
        let core = core_with_card().await;
        core.open_account(AccountId(2), None).await.unwrap();
        let wire = PaymentRequest::new(
            AccountId(1),
            Amount::new(3_000).unwrap(),
            Currency::brl(),
            Instrument::Wire,
            "w1",
        )
        .to(AccountId(2));
        let payment = core.pay(wire).await.unwrap();
        let hold = payment.hold_id.unwrap();

        assert!(matches!(
            core.capture_authorization(hold).await,
            Err(PaymentError::InvalidTransition(_))
        ));
        assert!(matches!(
            core.release_authorization(hold).await,
            Err(PaymentError::InvalidTransition(_))
        ));

        let rejected = core
            .on_clearing_result(payment.id, ClearingOutcome::Rejected("R03".into()))
            .await
            .unwrap();
        assert_eq!(rejected.state, crate::domain::payment::PaymentState::Failed);
        let account = core.account(AccountId(1)).await.unwrap();
        assert_eq!(account.available, Balance::new(50_000));
        assert_eq!(account.held, Balance::ZERO);
    }

    #[tokio::test]
    async fn test_card_for_unknown_account_is_rejected() {
        let core = core_with_card().await;
        assert!(matches!(
            core.issue_card(CardId(5), AccountId(77), Amount::new(10).unwrap())
                .await,
            Err(PaymentError::NotFound(_))
        ));
    }
}
