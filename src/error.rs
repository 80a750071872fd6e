use thiserror::Error;

/// Errors surfaced by the ledger core.
///
/// Business denials (`InsufficientFunds`, `LimitExceeded`, ...) are terminal
/// outcomes returned verbatim to the caller. Only `Contention` is retryable.
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Insufficient funds on account {account}")]
    InsufficientFunds { account: String },
    #[error("Card {card} limit exceeded")]
    LimitExceeded { card: String },
    #[error("Account {0} is blocked")]
    AccountBlocked(String),
    #[error("Card {0} is blocked")]
    CardBlocked(String),
    #[error("Payment {0} was already refunded")]
    AlreadyRefunded(String),
    #[error("Concurrent modification of {0}, retries exhausted")]
    Contention(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Hold {0} expired")]
    HoldExpired(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
    #[error("Idempotency key {0} reused with a different request")]
    IdempotencyConflict(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, PaymentError>;

impl PaymentError {
    /// Stable machine-readable code for the failure.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::LimitExceeded { .. } => "LIMIT_EXCEEDED",
            Self::AccountBlocked(_) => "ACCOUNT_BLOCKED",
            Self::CardBlocked(_) => "CARD_BLOCKED",
            Self::AlreadyRefunded(_) => "ALREADY_REFUNDED",
            Self::Contention(_) => "CONTENTION",
            Self::NotFound(_) => "NOT_FOUND",
            Self::HoldExpired(_) => "HOLD_EXPIRED",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::CsvError(_) | Self::IoError(_) | Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention(_))
    }

    /// True for outcomes decided by business rules rather than by a fault.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds { .. }
                | Self::LimitExceeded { .. }
                | Self::AccountBlocked(_)
                | Self::CardBlocked(_)
                | Self::HoldExpired(_)
        )
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(Box::new(std::io::Error::other(message.into())))
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        Self::InternalError(Box::new(err))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(err: rocksdb::Error) -> Self {
        Self::InternalError(Box::new(err))
    }
}
