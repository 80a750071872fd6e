use super::locks::KeyedLocks;
use crate::domain::idempotency::{Fingerprint, IdempotencyRecord, Outcome};
use crate::domain::ports::{ClockRef, IdempotencyStoreRef};
use crate::error::{PaymentError, Result};
use chrono::Duration;
use tokio::sync::OwnedMutexGuard;

/// Result of looking up an idempotency key.
#[derive(Debug)]
pub enum KeyCheck {
    /// A prior request with the same key and fingerprint already produced this outcome.
    Hit(Outcome),
    /// No live outcome exists; the caller now exclusively owns the key.
    Miss(KeyReservation),
}

/// Exclusive claim on an idempotency key.
///
/// Concurrent requests with the same key wait until the reservation is
/// completed or dropped. Dropping without completing leaves nothing behind,
/// so the next request re-evaluates from scratch.
#[derive(Debug)]
pub struct KeyReservation {
    key: String,
    fingerprint: Fingerprint,
    _guard: OwnedMutexGuard<()>,
}

impl KeyReservation {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Deduplicates retried requests carrying the same client-supplied key.
pub struct IdempotencyGuard {
    store: IdempotencyStoreRef,
    clock: ClockRef,
    retention: Duration,
    locks: KeyedLocks<String>,
}

impl IdempotencyGuard {
    pub fn new(store: IdempotencyStoreRef, clock: ClockRef, retention: Duration) -> Self {
        Self {
            store,
            clock,
            retention,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn check_or_reserve(&self, key: &str, fingerprint: Fingerprint) -> Result<KeyCheck> {
        if key.trim().is_empty() {
            return Err(PaymentError::ValidationError(
                "Idempotency key must not be empty".to_string(),
            ));
        }

        let guard = self.locks.acquire(&key.to_string()).await;
        let now = self.clock.now();

        if let Some(record) = self.store.get(key).await?
            && !record.is_expired(now)
        {
            if record.fingerprint != fingerprint {
                return Err(PaymentError::IdempotencyConflict(key.to_string()));
            }
            tracing::debug!(key, "idempotency hit");
            return Ok(KeyCheck::Hit(record.outcome));
        }

        Ok(KeyCheck::Miss(KeyReservation {
            key: key.to_string(),
            fingerprint,
            _guard: guard,
        }))
    }

    /// Durably binds the reserved key to `outcome`, then lets waiters through.
    pub async fn complete(&self, reservation: KeyReservation, outcome: Outcome) -> Result<()> {
        let record = IdempotencyRecord::new(
            reservation.key.clone(),
            reservation.fingerprint.clone(),
            outcome,
            self.clock.now(),
            self.retention,
        );
        self.store.put(record).await?;
        drop(reservation);
        Ok(())
    }

    /// Drops expired records and idle key locks.
    pub async fn purge_expired(&self) -> Result<usize> {
        let purged = self.store.purge_expired(self.clock.now()).await?;
        self.locks.prune();
        Ok(purged)
    }
}
