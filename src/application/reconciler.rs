use super::coordinator::LedgerCoordinator;
use super::idempotency::IdempotencyGuard;
use super::payments::PaymentProcessor;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub holds_released: usize,
    pub payments_failed: usize,
    pub keys_purged: usize,
    /// Holds that could not be processed this round.
    pub errors: usize,
}

impl SweepReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Releases holds past their expiry and prunes idempotency state.
pub struct Reconciler {
    coordinator: Arc<LedgerCoordinator>,
    processor: Arc<PaymentProcessor>,
    idempotency: Arc<IdempotencyGuard>,
}

impl Reconciler {
    pub fn new(
        coordinator: Arc<LedgerCoordinator>,
        processor: Arc<PaymentProcessor>,
        idempotency: Arc<IdempotencyGuard>,
    ) -> Self {
        Self {
            coordinator,
            processor,
            idempotency,
        }
    }

    /// Runs a single sweep.
    ///
    /// Each candidate is re-checked under its account lock, so a hold captured
    /// or released after the scan is left alone.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let now = self.coordinator.clock.now();

        for hold in self.coordinator.holds.expired(now).await? {
            let mut ledger = match self.coordinator.lock(hold.account).await {
                Ok(ledger) => ledger,
                Err(err) => {
                    tracing::warn!(hold = %hold.id, "skipping expired hold: {err}");
                    report.errors += 1;
                    continue;
                }
            };
            match ledger.expire(hold.id).await {
                Ok(Some(released)) => {
                    report.holds_released += 1;
                    match self.processor.hold_lapsed(&released).await {
                        Ok(true) => report.payments_failed += 1,
                        Ok(false) => {}
                        Err(err) => {
                            tracing::warn!(hold = %hold.id, "failed to close payment of expired hold: {err}");
                            report.errors += 1;
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(hold = %hold.id, "failed to release expired hold: {err}");
                    report.errors += 1;
                }
            }
        }

        report.keys_purged = self.idempotency.purge_expired().await?;
        self.coordinator.prune_locks();
        Ok(report)
    }

    /// Sweeps every `period` until the handle is aborted.
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(report) if report.is_idle() => {}
                    Ok(report) => tracing::info!(?report, "sweep finished"),
                    Err(err) => tracing::error!("sweep failed: {err}"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::application::authorization::{AuthorizationRequest, FundingSource};
    use crate::application::payments::PaymentRequest;
    use crate::application::service::BankingCore;
    use crate::config::LedgerConfig;
    use crate::domain::ids::{AccountId, CardId};
    use crate::domain::money::{Amount, Balance, Currency};
    use crate::domain::payment::{Instrument, PaymentState};
    use crate::domain::ports::Stores;
    use crate::error::PaymentError;
    use crate::infrastructure::clearing::InlineClearing;
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::notifier::LogNotifier;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    async fn fixture() -> (BankingCore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = LedgerConfig {
            card_hold_ttl: Duration::minutes(10),
            payment_hold_ttl: Duration::minutes(30),
            ..LedgerConfig::default()
        };
        let core = BankingCore::new(
            Stores::in_memory(),
            config,
            Arc::new(InlineClearing),
            Arc::new(LogNotifier),
            clock.clone(),
        );
        core.open_account(AccountId(1), None).await.unwrap();
        core.deposit(AccountId(1), Amount::new(10_000).unwrap())
            .await
            .unwrap();
        core.issue_card(CardId(7), AccountId(1), Amount::new(5_000).unwrap())
            .await
            .unwrap();
        (core, clock)
    }

    #[tokio::test]
    async fn test_sweep_releases_expired_authorization() {
        let (core, clock) = fixture().await;
        let auth = core
            .authorize(AuthorizationRequest {
                source: FundingSource::Card(CardId(7)),
                amount: Amount::new(1_500).unwrap(),
                idempotency_key: "auth-1".into(),
            })
            .await
            .unwrap();

        assert!(core.sweep().await.unwrap().is_idle());

        clock.advance(Duration::minutes(11));
        let report = core.sweep().await.unwrap();
        assert_eq!(report.holds_released, 1);
        assert_eq!(report.payments_failed, 0);

        let account = core.account(AccountId(1)).await.unwrap();
        assert_eq!(account.available, Balance::new(10_000));
        assert_eq!(account.held, Balance::ZERO);
        assert_eq!(core.card(CardId(7)).await.unwrap().spent, Balance::ZERO);

        assert!(matches!(
            core.capture_authorization(auth.hold_id).await,
            Err(PaymentError::HoldExpired(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_fails_unsettled_payment() {
        let (core, clock) = fixture().await;
        let payment = core
            .pay(PaymentRequest::new(
                AccountId(1),
                Amount::new(2_000).unwrap(),
                Currency::brl(),
                Instrument::Wire,
                "wire-1",
            ))
            .await
            .unwrap();
        assert_eq!(payment.state, PaymentState::Processing);

        clock.advance(Duration::minutes(31));
        let report = core.sweep().await.unwrap();
        assert_eq!(report.holds_released, 1);
        assert_eq!(report.payments_failed, 1);

        let payment = core.payment(payment.id).await.unwrap();
        assert_eq!(payment.state, PaymentState::Failed);
        assert_eq!(payment.failure_reason.as_deref(), Some("HOLD_EXPIRED"));
        let account = core.account(AccountId(1)).await.unwrap();
        assert_eq!(account.available, Balance::new(10_000));
        assert_eq!(account.total, Balance::new(10_000));
    }

    #[tokio::test]
    async fn test_sweep_ignores_captured_holds() {
        let (core, clock) = fixture().await;
        let auth = core
            .authorize(AuthorizationRequest {
                source: FundingSource::Card(CardId(7)),
                amount: Amount::new(500).unwrap(),
                idempotency_key: "auth-2".into(),
            })
            .await
            .unwrap();
        core.capture_authorization(auth.hold_id).await.unwrap();

        clock.advance(Duration::hours(1));
        assert_eq!(core.sweep().await.unwrap().holds_released, 0);
        assert_eq!(
            core.account(AccountId(1)).await.unwrap().total,
            Balance::new(9_500)
        );
    }

    #[tokio::test]
    async fn test_sweep_purges_idempotency_keys() {
        let (core, clock) = fixture().await;
        core.pay(
            PaymentRequest::new(
                AccountId(1),
                Amount::new(100).unwrap(),
                Currency::brl(),
                Instrument::InstantTransfer,
                "pix-1",
            ),
        )
        .await
        .unwrap();

        clock.advance(Duration::hours(25));
        assert_eq!(core.sweep().await.unwrap().keys_purged, 1);
    }

    #[tokio::test]
    async fn test_spawned_sweeper_releases_holds() {
        let (core, clock) = fixture().await;
        let core = Arc::new(core);
        core.authorize(AuthorizationRequest {
            source: FundingSource::Card(CardId(7)),
            amount: Amount::new(800).unwrap(),
            idempotency_key: "auth-3".into(),
        })
        .await
        .unwrap();
        clock.advance(Duration::minutes(11));

        // The first tick fires immediately.
        let handle = core.spawn_reconciler();
        let mut held = core.account(AccountId(1)).await.unwrap().held;
        for _ in 0..100 {
            if held == Balance::ZERO {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            held = core.account(AccountId(1)).await.unwrap().held;
        }
        handle.abort();
        assert_eq!(held, Balance::ZERO);
    }
}
