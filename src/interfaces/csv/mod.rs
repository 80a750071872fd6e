pub mod account_writer;
pub mod journal_reader;
