use super::ids::{HoldId, PaymentId};
use crate::error::PaymentError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex SHA-256 digest of a request's canonical JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of<T: Serialize>(request: &T) -> Result<Self, PaymentError> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(request)?);
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The durable result a key resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Outcome {
    Authorization(HoldId),
    Payment(PaymentId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub fingerprint: Fingerprint,
    pub outcome: Outcome,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn new(
        key: impl Into<String>,
        fingerprint: Fingerprint,
        outcome: Outcome,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Self {
        Self {
            key: key.into(),
            fingerprint,
            outcome,
            created_at: now,
            expires_at: now + retention,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Request {
        amount: i64,
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = Fingerprint::of(&Request { amount: 10 }).unwrap();
        let b = Fingerprint::of(&Request { amount: 10 }).unwrap();
        let c = Fingerprint::of(&Request { amount: 11 }).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_is_lowercase_hex_sha256() {
        let fingerprint = Fingerprint::of(&1).unwrap();
        assert_eq!(
            fingerprint.as_str(),
            "6b86b273ff34fce19d6b804eff5a3f5747ada4eaa22f1d49c01e52ddb7875b4b"
        );
    }

    #[test]
    fn test_record_expiry() {
        let now = Utc::now();
        let record = IdempotencyRecord::new(
            "k",
            Fingerprint::of(&Request { amount: 1 }).unwrap(),
            Outcome::Payment(PaymentId::new()),
            now,
            Duration::hours(24),
        );
        assert!(!record.is_expired(now + Duration::hours(23)));
        assert!(record.is_expired(now + Duration::hours(24)));
    }
}
