use crate::domain::money::{Amount, Currency};
use crate::domain::payment::Instrument;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use std::io::Read;

/// Operation named in the `op` column of a journal row.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Open,
    Deposit,
    Card,
    Limit,
    Block,
    Unblock,
    Authorize,
    Capture,
    Release,
    Pay,
    Settle,
    Reject,
    Refund,
    Sweep,
}

/// One journal row. Columns an operation does not use are left empty.
///
/// `amount` is in major units of the row's currency; `key` names the
/// authorization or payment a later row refers back to.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct JournalRecord {
    pub op: Operation,
    #[serde(default)]
    pub account: Option<u32>,
    #[serde(default)]
    pub card: Option<u32>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub instrument: Option<Instrument>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub destination: Option<u32>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl JournalRecord {
    /// Converts the major-unit amount into minor units of `currency`.
    pub fn minor_amount(&self, currency: &Currency) -> Result<Amount> {
        let amount = self
            .amount
            .ok_or_else(|| missing(self.op, "amount"))?;
        let scale = Decimal::from(10i64.pow(currency.exponent()));
        let minor = amount * scale;
        if !minor.fract().is_zero() {
            return Err(PaymentError::ValidationError(format!(
                "{amount} has more precision than {currency} allows"
            )));
        }
        let minor = minor
            .to_i64()
            .ok_or_else(|| PaymentError::ValidationError(format!("{amount} is out of range")))?;
        Amount::new(minor)
    }

    pub fn require<T: Copy>(&self, value: Option<T>, column: &str) -> Result<T> {
        value.ok_or_else(|| missing(self.op, column))
    }

    pub fn require_key(&self) -> Result<&str> {
        self.key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| missing(self.op, "key"))
    }
}

fn missing(op: Operation, column: &str) -> PaymentError {
    PaymentError::ValidationError(format!("{op:?} row is missing {column}"))
}

/// Reads journal rows from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths,
/// so trailing empty columns may be omitted.
pub struct JournalReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> JournalReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows, one `Result` per line.
    pub fn records(self) -> impl Iterator<Item = Result<JournalRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
