use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aurum_core::AggregateId;
use aurum_events::DomainEvent;

/// Financial transaction identifier (e.g. `"TXN-2024-0007"`).
///
/// Together with the transaction type string it forms the natural key of the
/// financial report read model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub AggregateId);

impl TransactionId {
    pub fn new(id: impl Into<AggregateId>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl core::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Event: a settlement transaction was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementCreated {
    pub transaction_id: TransactionId,
    /// Business transaction type tag, e.g. `"LC_SETTLEMENT"`.
    pub transaction_type: String,
    /// Settlement amount in smallest currency unit.
    pub settlement_amount_minor: u64,
    pub currency: String,
    pub dealer_id: Option<String>,
    pub settlement_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: a settlement transaction was processed by the back office.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementProcessed {
    pub transaction_id: TransactionId,
    pub transaction_type: String,
    pub processed_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: an invoice tied to the transaction was settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSettled {
    pub transaction_id: TransactionId,
    pub transaction_type: String,
    pub invoice_number: String,
    /// Invoice total in smallest currency unit.
    pub invoice_amount_minor: u64,
    /// Amount applied against the invoice, when known at settlement time.
    pub settlement_amount_minor: Option<u64>,
    pub settled_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Financial transaction events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FinanceEvent {
    SettlementCreated(SettlementCreated),
    SettlementProcessed(SettlementProcessed),
    InvoiceSettled(InvoiceSettled),
}

impl FinanceEvent {
    pub fn transaction_id(&self) -> &TransactionId {
        match self {
            FinanceEvent::SettlementCreated(e) => &e.transaction_id,
            FinanceEvent::SettlementProcessed(e) => &e.transaction_id,
            FinanceEvent::InvoiceSettled(e) => &e.transaction_id,
        }
    }

    pub fn transaction_type(&self) -> &str {
        match self {
            FinanceEvent::SettlementCreated(e) => &e.transaction_type,
            FinanceEvent::SettlementProcessed(e) => &e.transaction_type,
            FinanceEvent::InvoiceSettled(e) => &e.transaction_type,
        }
    }
}

impl DomainEvent for FinanceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            FinanceEvent::SettlementCreated(_) => "finance.settlement.created",
            FinanceEvent::SettlementProcessed(_) => "finance.settlement.processed",
            FinanceEvent::InvoiceSettled(_) => "finance.invoice.settled",
        }
    }

    fn aggregate_type(&self) -> &'static str {
        "finance.transaction"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            FinanceEvent::SettlementCreated(e) => e.occurred_at,
            FinanceEvent::SettlementProcessed(e) => e.occurred_at,
            FinanceEvent::InvoiceSettled(e) => e.occurred_at,
        }
    }
}
