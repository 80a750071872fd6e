use crate::domain::account::{Account, AccountStatus};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

const HEADER: [&str; 6] = ["account", "currency", "available", "held", "total", "status"];

#[derive(Debug, Serialize)]
struct AccountRow<'a> {
    account: u32,
    currency: &'a str,
    available: Decimal,
    held: Decimal,
    total: Decimal,
    status: AccountStatus,
}

/// Writes the final account table, amounts in major units.
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(sink),
        }
    }

    /// Writes the header even when there are no accounts.
    pub fn write_accounts(&mut self, accounts: &[Account]) -> Result<()> {
        self.writer.write_record(HEADER)?;
        for account in accounts {
            let exponent = account.currency.exponent();
            self.writer.serialize(AccountRow {
                account: account.id.0,
                currency: account.currency.code(),
                available: account.available.to_major(exponent),
                held: account.held.to_major(exponent),
                total: account.total.to_major(exponent),
                status: account.status,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
