use super::coordinator::LedgerCoordinator;
use super::idempotency::{IdempotencyGuard, KeyCheck};
use super::ledger::Reservation;
use crate::domain::hold::{Hold, HoldReason};
use crate::domain::idempotency::{Fingerprint, Outcome};
use crate::domain::ids::{AccountId, CardId, HoldId, PaymentId};
use crate::domain::money::Amount;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a debit is drawn on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum FundingSource {
    Card(CardId),
    Account(AccountId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub source: FundingSource,
    pub amount: Amount,
    pub idempotency_key: String,
}

/// A granted authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub hold_id: HoldId,
    pub account: AccountId,
    pub amount: Amount,
    pub expires_at: DateTime<Utc>,
}

impl Authorization {
    fn from_hold(hold: &Hold) -> Self {
        Self {
            hold_id: hold.id,
            account: hold.account,
            amount: hold.amount,
            expires_at: hold.expires_at,
        }
    }
}

/// Grants or denies debits and turns grants into holds.
pub struct AuthorizationEngine {
    coordinator: Arc<LedgerCoordinator>,
    idempotency: Arc<IdempotencyGuard>,
    hold_ttl: Duration,
}

impl AuthorizationEngine {
    pub fn new(
        coordinator: Arc<LedgerCoordinator>,
        idempotency: Arc<IdempotencyGuard>,
        hold_ttl: Duration,
    ) -> Self {
        Self {
            coordinator,
            idempotency,
            hold_ttl,
        }
    }

    /// Authorizes a debit at most once per idempotency key. A retry of a
    /// granted request gets the original authorization back unchanged.
    ///
    /// Only grants are remembered; a denied request may be retried and is
    /// evaluated again against the current state.
    pub async fn authorize(&self, request: AuthorizationRequest) -> Result<Authorization> {
        let fingerprint = Fingerprint::of(&(request.source, request.amount))?;
        let reservation = match self
            .idempotency
            .check_or_reserve(&request.idempotency_key, fingerprint)
            .await?
        {
            KeyCheck::Hit(Outcome::Authorization(hold_id)) => {
                let hold = self.coordinator.hold(hold_id).await?;
                return Ok(Authorization::from_hold(&hold));
            }
            KeyCheck::Hit(Outcome::Payment(_)) => {
                return Err(PaymentError::IdempotencyConflict(request.idempotency_key));
            }
            KeyCheck::Miss(reservation) => reservation,
        };

        let hold = match self
            .evaluate(
                request.source,
                request.amount,
                HoldReason::CardAuthorization,
                None,
                self.hold_ttl,
            )
            .await
        {
            Ok(hold) => hold,
            Err(err) => {
                if err.is_denial() {
                    tracing::info!(
                        source = ?request.source,
                        amount = %request.amount,
                        reason = err.reason_code(),
                        "authorization denied"
                    );
                }
                return Err(err);
            }
        };

        self.idempotency
            .complete(reservation, Outcome::Authorization(hold.id))
            .await?;
        tracing::info!(source = ?request.source, hold = %hold.id, amount = %request.amount, "authorization granted");
        Ok(Authorization::from_hold(&hold))
    }

    /// Evaluates a debit under the owning account's lock, without idempotency.
    pub(crate) async fn evaluate(
        &self,
        source: FundingSource,
        amount: Amount,
        reason: HoldReason,
        payment: Option<PaymentId>,
        ttl: Duration,
    ) -> Result<Hold> {
        let (account, card) = match source {
            FundingSource::Card(id) => (self.coordinator.card(id).await?.account, Some(id)),
            FundingSource::Account(id) => (id, None),
        };
        let reservation = Reservation {
            amount,
            reason,
            card,
            payment,
            ttl,
        };
        self.coordinator
            .with_account_lock(account, move |ledger| {
                Box::pin(async move { ledger.reserve(reservation).await })
            })
            .await
    }

    /// Captures a card authorization, permanently debiting the account.
    pub async fn capture(&self, hold_id: HoldId) -> Result<Hold> {
        let account = self.coordinator.hold(hold_id).await?.account;
        self.coordinator
            .with_account_lock(account, move |ledger| {
                Box::pin(async move {
                    ensure_card_authorization(&ledger.hold(hold_id).await?)?;
                    ledger.capture(hold_id).await
                })
            })
            .await
    }

    /// Cancels a card authorization, returning funds and card spend.
    pub async fn release(&self, hold_id: HoldId) -> Result<Hold> {
        let account = self.coordinator.hold(hold_id).await?.account;
        self.coordinator
            .with_account_lock(account, move |ledger| {
                Box::pin(async move {
                    ensure_card_authorization(&ledger.hold(hold_id).await?)?;
                    ledger.release(hold_id).await
                })
            })
            .await
    }
}

/// Holds backing a payment only move through the payment's own lifecycle.
fn ensure_card_authorization(hold: &Hold) -> Result<()> {
    if hold.reason != HoldReason::CardAuthorization || hold.payment.is_some() {
        return Err(PaymentError::InvalidTransition(format!(
            "hold {} backs a payment and is settled through clearing",
            hold.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::Account;
    use crate::domain::card::{Card, CardStatus};
    use crate::domain::money::{Balance, Currency};
    use crate::domain::ports::Stores;
    use crate::infrastructure::clock::SystemClock;

    struct Fixture {
        coordinator: Arc<LedgerCoordinator>,
        engine: Arc<AuthorizationEngine>,
    }

    async fn fixture(balance: i64, limit: i64) -> Fixture {
        let stores = Stores::in_memory();
        let clock = Arc::new(SystemClock);
        let coordinator = Arc::new(LedgerCoordinator::new(&stores, clock.clone(), 5));
        let idempotency = Arc::new(IdempotencyGuard::new(
            stores.idempotency.clone(),
            clock,
            Duration::hours(24),
        ));
        coordinator
            .open_account(Account::new(AccountId(1), Currency::new("BRL").unwrap()))
            .await
            .unwrap();
        coordinator
            .issue_card(Card::new(CardId(7), AccountId(1), Amount::new(limit).unwrap()))
            .await
            .unwrap();
        coordinator
            .with_account_lock(AccountId(1), move |ledger| {
                Box::pin(async move { ledger.credit(Amount::new(balance)?).await })
            })
            .await
            .unwrap();
        let engine = Arc::new(AuthorizationEngine::new(
            coordinator.clone(),
            idempotency,
            Duration::days(7),
        ));
        Fixture {
            coordinator,
            engine,
        }
    }

    fn card_request(amount: i64, key: &str) -> AuthorizationRequest {
        AuthorizationRequest {
            source: FundingSource::Card(CardId(7)),
            amount: Amount::new(amount).unwrap(),
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_grant_places_hold() {
        let f = fixture(5000, 1000).await;
        let auth = f.engine.authorize(card_request(700, "a1")).await.unwrap();
        assert_eq!(auth.amount, Amount::new(700).unwrap());

        let account = f.coordinator.account(AccountId(1)).await.unwrap();
        assert_eq!(account.available, Balance::new(4300));
        assert_eq!(account.held, Balance::new(700));
        let card = f.coordinator.card(CardId(7)).await.unwrap();
        assert_eq!(card.spent, Balance::new(700));
    }

    #[tokio::test]
    async fn test_replay_returns_same_hold() {
        let f = fixture(5000, 1000).await;
        let first = f.engine.authorize(card_request(300, "a1")).await.unwrap();
        let second = f.engine.authorize(card_request(300, "a1")).await.unwrap();
        assert_eq!(first, second);

        let account = f.coordinator.account(AccountId(1)).await.unwrap();
        assert_eq!(account.held, Balance::new(300));
    }

    #[tokio::test]
    async fn test_limit_exceeded_is_not_cached() {
        let f = fixture(5000, 1000).await;
        f.engine.authorize(card_request(700, "a1")).await.unwrap();
        let denied = f.engine.authorize(card_request(400, "a2")).await;
        assert!(matches!(denied, Err(PaymentError::LimitExceeded { .. })));

        f.coordinator
            .with_account_lock(AccountId(1), |ledger| {
                Box::pin(async move {
                    ledger
                        .update_card(CardId(7), |card| {
                            card.limit = Balance::new(2000);
                            Ok(())
                        })
                        .await
                })
            })
            .await
            .unwrap();

        let retried = f.engine.authorize(card_request(400, "a2")).await.unwrap();
        assert_eq!(f.coordinator.hold(retried.hold_id).await.unwrap().amount.value(), 400);
    }

    #[tokio::test]
    async fn test_blocked_card_denied() {
        let f = fixture(5000, 1000).await;
        f.coordinator
            .with_account_lock(AccountId(1), |ledger| {
                Box::pin(async move {
                    ledger
                        .update_card(CardId(7), |card| {
                            card.status = CardStatus::Blocked;
                            Ok(())
                        })
                        .await
                })
            })
            .await
            .unwrap();
        assert!(matches!(
            f.engine.authorize(card_request(10, "a1")).await,
            Err(PaymentError::CardBlocked(_))
        ));
    }

    #[tokio::test]
    async fn test_insufficient_funds_reported_verbatim() {
        let f = fixture(100, 1000).await;
        let denied = f.engine.authorize(card_request(500, "a1")).await.unwrap_err();
        assert_eq!(denied.reason_code(), "INSUFFICIENT_FUNDS");
        let card = f.coordinator.card(CardId(7)).await.unwrap();
        assert_eq!(card.spent, Balance::ZERO);
    }

    #[tokio::test]
    async fn test_unknown_card_not_found() {
        let f = fixture(100, 1000).await;
        let mut request = card_request(10, "a1");
        request.source = FundingSource::Card(CardId(404));
        assert!(matches!(
            f.engine.authorize(request).await,
            Err(PaymentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_capture_and_release_authorizations() {
        let f = fixture(5000, 1000).await;
        let kept = f.engine.authorize(card_request(200, "a1")).await.unwrap();
        let cancelled = f.engine.authorize(card_request(300, "a2")).await.unwrap();

        f.engine.capture(kept.hold_id).await.unwrap();
        f.engine.release(cancelled.hold_id).await.unwrap();

        let account = f.coordinator.account(AccountId(1)).await.unwrap();
        assert_eq!(account.total, Balance::new(4800));
        assert_eq!(account.available, Balance::new(4800));
        assert_eq!(account.held, Balance::ZERO);
        let card = f.coordinator.card(CardId(7)).await.unwrap();
        assert_eq!(card.spent, Balance::new(200));
    }

    #[tokio::test]
    async fn test_payment_holds_are_not_card_authorizations() {
        let f = fixture(5000, 1000).await;
        let hold = f
            .engine
            .evaluate(
                FundingSource::Account(AccountId(1)),
                Amount::new(3000).unwrap(),
                HoldReason::PaymentDebit,
                Some(PaymentId::new()),
                Duration::days(3),
            )
            .await
            .unwrap();

        assert!(matches!(
            f.engine.capture(hold.id).await,
            Err(PaymentError::InvalidTransition(_))
        ));
        assert!(matches!(
            f.engine.release(hold.id).await,
            Err(PaymentError::InvalidTransition(_))
        ));

        let account = f.coordinator.account(AccountId(1)).await.unwrap();
        assert_eq!(account.held, Balance::new(3000));
        assert_eq!(account.total, Balance::new(5000));
        assert_eq!(
            f.coordinator.hold(hold.id).await.unwrap().state,
            crate::domain::hold::HoldState::Active
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_authorizations_respect_limit() {
        let f = fixture(5000, 1000).await;
        let a = {
            let engine = f.engine.clone();
            tokio::spawn(async move { engine.authorize(card_request(700, "c-700")).await })
        };
        let b = {
            let engine = f.engine.clone();
            tokio::spawn(async move { engine.authorize(card_request(400, "c-400")).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        let granted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(granted, 1);
        let card = f.coordinator.card(CardId(7)).await.unwrap();
        assert!(card.spent <= card.limit);
        let denied = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(matches!(denied, PaymentError::LimitExceeded { .. }));
    }
}
