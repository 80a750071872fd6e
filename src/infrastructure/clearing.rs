use crate::domain::events::ClearingResponse;
use crate::domain::payment::Payment;
use crate::domain::ports::ClearingGateway;
use crate::error::Result;
use async_trait::async_trait;

/// Settles instant instruments on submission and defers everything else.
///
/// Deferred payments wait for `on_clearing_result`, which the replay binary
/// drives through `settle` and `reject` journal rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineClearing;

#[async_trait]
impl ClearingGateway for InlineClearing {
    async fn submit(&self, payment: &Payment) -> Result<ClearingResponse> {
        if payment.instrument.is_instant() {
            Ok(ClearingResponse::Settled)
        } else {
            tracing::debug!(payment = %payment.id, instrument = ?payment.instrument, "clearing deferred");
            Ok(ClearingResponse::Deferred)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::AccountId;
    use crate::domain::money::{Amount, Currency};
    use crate::domain::payment::Instrument;
    use chrono::Utc;

    fn payment(instrument: Instrument) -> Payment {
        Payment::new(
            AccountId(1),
            Amount::new(100).unwrap(),
            Currency::new("BRL").unwrap(),
            instrument,
            "k",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_instant_settles_inline() {
        let clearing = InlineClearing;
        for instrument in [Instrument::Card, Instrument::InstantTransfer, Instrument::BatchItem] {
            assert_eq!(
                clearing.submit(&payment(instrument)).await.unwrap(),
                ClearingResponse::Settled
            );
        }
    }

    #[tokio::test]
    async fn test_slow_rails_are_deferred() {
        let clearing = InlineClearing;
        for instrument in [Instrument::Wire, Instrument::ScheduledTransfer, Instrument::Invoice] {
            assert_eq!(
                clearing.submit(&payment(instrument)).await.unwrap(),
                ClearingResponse::Deferred
            );
        }
    }
}
