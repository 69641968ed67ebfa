//! `aurum-finance` — financial settlement domain events.

pub mod events;

pub use events::{
    FinanceEvent, InvoiceSettled, SettlementCreated, SettlementProcessed, TransactionId,
};
