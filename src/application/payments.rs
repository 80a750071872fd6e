use super::authorization::{AuthorizationEngine, FundingSource};
use super::coordinator::LedgerCoordinator;
use super::idempotency::{IdempotencyGuard, KeyCheck};
use crate::domain::events::{ClearingOutcome, ClearingResponse, PaymentEvent};
use crate::domain::hold::{Hold, HoldReason};
use crate::domain::idempotency::{Fingerprint, Outcome};
use crate::domain::ids::{AccountId, BatchId, CardId, PaymentId};
use crate::domain::money::{Amount, Currency};
use crate::domain::payment::{Instrument, Payment, PaymentState};
use crate::domain::ports::{ClearingGatewayRef, EventSinkRef, PaymentStoreRef};
use crate::error::{PaymentError, Result};
use chrono::Duration;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Failure reason of a settled payment whose destination could not be credited.
pub const DESTINATION_CREDIT_FAILED: &str = "DESTINATION_CREDIT_FAILED";

/// A request to move money out of `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRequest {
    pub source: AccountId,
    /// `None` when the beneficiary is outside the ledger.
    pub destination: Option<AccountId>,
    /// Required for card payments.
    pub card: Option<CardId>,
    pub amount: Amount,
    pub currency: Currency,
    pub instrument: Instrument,
    pub metadata: BTreeMap<String, String>,
    #[serde(skip)]
    pub idempotency_key: String,
    #[serde(skip)]
    pub batch_id: Option<BatchId>,
}

impl PaymentRequest {
    pub fn new(
        source: AccountId,
        amount: Amount,
        currency: Currency,
        instrument: Instrument,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            source,
            destination: None,
            card: None,
            amount,
            currency,
            instrument,
            metadata: BTreeMap::new(),
            idempotency_key: idempotency_key.into(),
            batch_id: None,
        }
    }

    pub fn to(mut self, destination: AccountId) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_card(mut self, card: CardId) -> Self {
        self.card = Some(card);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub destination: Option<AccountId>,
    /// Raw minor units; validated per item.
    pub amount: i64,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub source: AccountId,
    pub currency: Currency,
    pub items: Vec<BatchItem>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItemResult {
    pub index: usize,
    pub payment: Option<PaymentId>,
    pub state: PaymentState,
    pub reason: Option<String>,
}

/// Per-item outcome of a batch. Items succeed or fail independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub batch_id: BatchId,
    pub completed: usize,
    pub failed: usize,
    pub processing: usize,
    pub items: Vec<BatchItemResult>,
}

/// Result of refunding a completed payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refund {
    pub original: Payment,
    pub reversal: Payment,
}

/// Drives payments through their lifecycle.
pub struct PaymentProcessor {
    coordinator: Arc<LedgerCoordinator>,
    engine: Arc<AuthorizationEngine>,
    idempotency: Arc<IdempotencyGuard>,
    payments: PaymentStoreRef,
    clearing: ClearingGatewayRef,
    events: EventSinkRef,
    hold_ttl: Duration,
}

impl PaymentProcessor {
    pub fn new(
        coordinator: Arc<LedgerCoordinator>,
        engine: Arc<AuthorizationEngine>,
        idempotency: Arc<IdempotencyGuard>,
        payments: PaymentStoreRef,
        clearing: ClearingGatewayRef,
        events: EventSinkRef,
        hold_ttl: Duration,
    ) -> Self {
        Self {
            coordinator,
            engine,
            idempotency,
            payments,
            clearing,
            events,
            hold_ttl,
        }
    }

    pub async fn payment(&self, id: PaymentId) -> Result<Payment> {
        self.payments
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("payment {id}")))
    }

    pub async fn batch(&self, id: BatchId) -> Result<Vec<Payment>> {
        self.payments.by_batch(id).await
    }

    /// Creates a payment and runs it as far as it can go synchronously.
    ///
    /// A denied debit yields a `failed` payment carrying the denial's reason
    /// code. Denials are not remembered against the idempotency key, so a
    /// retry is evaluated afresh.
    pub async fn submit(&self, request: PaymentRequest) -> Result<Payment> {
        let funding = self.validate(&request).await?;
        let fingerprint = Fingerprint::of(&request)?;
        let reservation = match self
            .idempotency
            .check_or_reserve(&request.idempotency_key, fingerprint)
            .await?
        {
            KeyCheck::Hit(Outcome::Payment(id)) => return self.payment(id).await,
            KeyCheck::Hit(Outcome::Authorization(_)) => {
                return Err(PaymentError::IdempotencyConflict(request.idempotency_key));
            }
            KeyCheck::Miss(reservation) => reservation,
        };

        let now = self.coordinator.clock.now();
        let mut payment = Payment::new(
            request.source,
            request.amount,
            request.currency,
            request.instrument,
            request.idempotency_key,
            now,
        );
        payment.destination = request.destination;
        payment.card = request.card;
        payment.metadata = request.metadata;
        payment.batch_id = request.batch_id;

        self.payments.insert(payment.clone()).await?;
        self.emit(&payment);
        self.advance(&mut payment, PaymentState::Pending).await?;

        let hold = self
            .engine
            .evaluate(
                funding,
                payment.amount(),
                HoldReason::PaymentDebit,
                Some(payment.id),
                self.hold_ttl,
            )
            .await;
        let hold = match hold {
            Ok(hold) => hold,
            Err(err) => {
                tracing::info!(payment = %payment.id, reason = err.reason_code(), "payment denied");
                self.fail(&mut payment, err.reason_code()).await?;
                return if err.is_denial() { Ok(payment) } else { Err(err) };
            }
        };

        payment.hold_id = Some(hold.id);
        let id = payment.id;
        // Once funds are held the key belongs to this payment, even if the
        // rest of the flow errors out.
        let cleared = self.clear(payment).await;
        self.idempotency
            .complete(reservation, Outcome::Payment(id))
            .await?;
        cleared
    }

    async fn clear(&self, mut payment: Payment) -> Result<Payment> {
        self.advance(&mut payment, PaymentState::Processing).await?;

        let response = match self.clearing.submit(&payment).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(payment = %payment.id, "clearing submission failed, awaiting confirmation: {err}");
                ClearingResponse::Deferred
            }
        };
        match response {
            ClearingResponse::Settled => {
                self.on_clearing_result(payment.id, ClearingOutcome::Settled)
                    .await
            }
            ClearingResponse::Rejected(reason) => {
                self.on_clearing_result(payment.id, ClearingOutcome::Rejected(reason))
                    .await
            }
            ClearingResponse::Deferred => Ok(payment),
        }
    }

    /// Applies a settlement confirmation or rejection to a `processing` payment.
    pub async fn on_clearing_result(&self, id: PaymentId, outcome: ClearingOutcome) -> Result<Payment> {
        let source = self.payment(id).await?.source;
        let mut ledger = self.coordinator.lock(source).await?;
        let mut payment = self.payment(id).await?;
        if payment.state != PaymentState::Processing {
            return Err(PaymentError::InvalidTransition(format!(
                "payment {id} is {}, not processing",
                payment.state
            )));
        }
        let hold_id = payment
            .hold_id
            .ok_or_else(|| PaymentError::internal(format!("payment {id} has no hold")))?;

        match outcome {
            ClearingOutcome::Settled => match ledger.capture(hold_id).await {
                Ok(_) => {}
                Err(PaymentError::HoldExpired(_)) => {
                    self.fail(&mut payment, "HOLD_EXPIRED").await?;
                    return Ok(payment);
                }
                Err(err) => return Err(err),
            },
            ClearingOutcome::Rejected(reason) => {
                match ledger.release(hold_id).await {
                    Ok(_) | Err(PaymentError::HoldExpired(_)) => {}
                    Err(err) => return Err(err),
                }
                tracing::info!(payment = %id, reason = %reason, "clearing rejected payment");
                self.fail(&mut payment, reason).await?;
                return Ok(payment);
            }
        }

        // The payment stays `processing` with its hold captured until the
        // destination holds the funds.
        if let Some(destination) = payment.destination {
            drop(ledger);
            let amount = payment.amount();
            let credited = self
                .coordinator
                .with_account_lock(destination, move |ledger| {
                    Box::pin(async move { ledger.credit(amount).await })
                })
                .await;
            ledger = self.coordinator.lock(source).await?;
            if let Err(err) = credited {
                tracing::warn!(
                    payment = %id,
                    destination = %destination,
                    "destination refused credit, returning funds to source: {err}"
                );
                ledger.credit(amount).await?;
                if let Some(card) = payment.card {
                    ledger
                        .update_card(card, |card| {
                            card.restore_spend(amount);
                            Ok(())
                        })
                        .await?;
                }
                self.fail(&mut payment, DESTINATION_CREDIT_FAILED).await?;
                return Ok(payment);
            }
        }
        self.advance(&mut payment, PaymentState::Completed).await?;
        drop(ledger);
        tracing::info!(payment = %id, "payment completed");
        Ok(payment)
    }

    /// Refunds a completed payment once, crediting the source with the
    /// original amount and recording a linked reversal.
    pub async fn refund(&self, id: PaymentId) -> Result<Refund> {
        let source = self.payment(id).await?.source;
        let mut ledger = self.coordinator.lock(source).await?;
        let mut payment = self.payment(id).await?;

        match payment.state {
            PaymentState::Completed if payment.reversal_of.is_none() => {}
            PaymentState::RefundPending | PaymentState::Refunded => {
                return Err(PaymentError::AlreadyRefunded(id.to_string()));
            }
            state => {
                return Err(PaymentError::InvalidTransition(format!(
                    "payment {id} is {state} and cannot be refunded"
                )));
            }
        }

        self.advance(&mut payment, PaymentState::RefundPending).await?;
        if let Err(err) = ledger.credit(payment.amount()).await {
            self.advance(&mut payment, PaymentState::Completed).await?;
            return Err(err);
        }

        let reversal = Payment::reversal(&payment, ledger.now());
        self.payments.insert(reversal.clone()).await?;
        self.emit(&reversal);

        payment.refunded_by = Some(reversal.id);
        self.advance(&mut payment, PaymentState::Refunded).await?;
        tracing::info!(payment = %id, reversal = %reversal.id, "payment refunded");
        Ok(Refund {
            original: payment,
            reversal,
        })
    }

    /// Submits every item as an independent payment sharing one batch id.
    pub async fn submit_batch(&self, request: BatchRequest) -> Result<BatchResult> {
        let mut batch_id = BatchId::new();
        let mut items = Vec::with_capacity(request.items.len());

        for (index, item) in request.items.into_iter().enumerate() {
            let submitted = match Amount::new(item.amount) {
                Ok(amount) => {
                    let mut payment = PaymentRequest::new(
                        request.source,
                        amount,
                        request.currency.clone(),
                        Instrument::BatchItem,
                        format!("{}:{index}", request.idempotency_key),
                    );
                    payment.destination = item.destination;
                    payment.metadata = item.metadata;
                    payment.batch_id = Some(batch_id);
                    self.submit(payment).await
                }
                Err(err) => Err(err),
            };

            let result = match submitted {
                Ok(payment) => {
                    // A replayed batch keeps the id its items were first filed under.
                    if let Some(existing) = payment.batch_id
                        && index == 0
                    {
                        batch_id = existing;
                    }
                    BatchItemResult {
                        index,
                        payment: Some(payment.id),
                        state: payment.state,
                        reason: payment.failure_reason,
                    }
                }
                Err(err) => {
                    tracing::info!(index, reason = err.reason_code(), "batch item rejected");
                    BatchItemResult {
                        index,
                        payment: None,
                        state: PaymentState::Failed,
                        reason: Some(err.reason_code().to_string()),
                    }
                }
            };
            items.push(result);
        }

        let count = |state: PaymentState| items.iter().filter(|item| item.state == state).count();
        let result = BatchResult {
            batch_id,
            completed: count(PaymentState::Completed),
            failed: count(PaymentState::Failed),
            processing: count(PaymentState::Processing),
            items,
        };
        tracing::info!(
            batch = %result.batch_id,
            completed = result.completed,
            failed = result.failed,
            "batch processed"
        );
        Ok(result)
    }

    /// Fails the unsettled payment backed by a hold that just lapsed.
    ///
    /// Must be called while the hold's account lock is held.
    pub(crate) async fn hold_lapsed(&self, hold: &Hold) -> Result<bool> {
        let Some(id) = hold.payment else {
            return Ok(false);
        };
        let mut payment = self.payment(id).await?;
        if !matches!(payment.state, PaymentState::Pending | PaymentState::Processing) {
            return Ok(false);
        }
        tracing::info!(payment = %id, hold = %hold.id, "payment hold expired before settlement");
        self.fail(&mut payment, "HOLD_EXPIRED").await?;
        Ok(true)
    }

    async fn validate(&self, request: &PaymentRequest) -> Result<FundingSource> {
        let source = self.coordinator.account(request.source).await?;
        if source.currency != request.currency {
            return Err(PaymentError::ValidationError(format!(
                "Payment currency {} does not match account {} currency {}",
                request.currency, source.id, source.currency
            )));
        }
        if let Some(destination) = request.destination {
            if destination == request.source {
                return Err(PaymentError::ValidationError(
                    "Source and destination must differ".to_string(),
                ));
            }
            let destination = self.coordinator.account(destination).await?;
            if destination.currency != request.currency {
                return Err(PaymentError::ValidationError(format!(
                    "Destination account {} holds {}",
                    destination.id, destination.currency
                )));
            }
        }
        match (request.instrument, request.card) {
            (Instrument::Card, None) => Err(PaymentError::ValidationError(
                "Card payments require a card".to_string(),
            )),
            (_, Some(card)) => {
                if self.coordinator.card(card).await?.account != request.source {
                    return Err(PaymentError::ValidationError(format!(
                        "Card {card} does not belong to account {}",
                        request.source
                    )));
                }
                Ok(FundingSource::Card(card))
            }
            (_, None) => Ok(FundingSource::Account(request.source)),
        }
    }

    async fn advance(&self, payment: &mut Payment, to: PaymentState) -> Result<()> {
        payment.transition(to, self.coordinator.clock.now())?;
        self.save(payment).await?;
        self.emit(payment);
        Ok(())
    }

    async fn fail(&self, payment: &mut Payment, reason: impl Into<String>) -> Result<()> {
        payment.fail(reason, self.coordinator.clock.now())?;
        self.save(payment).await?;
        self.emit(payment);
        Ok(())
    }

    async fn save(&self, payment: &mut Payment) -> Result<()> {
        if !self.payments.update(payment.clone()).await? {
            return Err(PaymentError::Contention(format!("payment {}", payment.id)));
        }
        payment.version += 1;
        Ok(())
    }

    /// Notifications never block or roll back a transition.
    fn emit(&self, payment: &Payment) {
        let event = PaymentEvent {
            payment_id: payment.id,
            new_state: payment.state,
            at: self.coordinator.clock.now(),
        };
        if let Err(err) = self.events.emit(event) {
            tracing::warn!(payment = %payment.id, state = %payment.state, "event delivery failed: {err}");
        }
    }
}
