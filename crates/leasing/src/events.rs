use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aurum_assets::AssetId;
use aurum_core::AggregateId;
use aurum_events::DomainEvent;

/// Lease contract identifier (e.g. `"LSE-2024-003"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(pub AggregateId);

impl ContractId {
    pub fn new(id: impl Into<AggregateId>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl core::fmt::Display for ContractId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Event: a lease contract was signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCreated {
    pub contract_id: ContractId,
    pub lessee: String,
    /// The leased asset, when it is tracked in the asset register.
    pub asset_id: Option<AssetId>,
    pub commencement_date: DateTime<Utc>,
    pub term_months: u32,
    /// Monthly payment in smallest currency unit.
    pub monthly_payment_minor: u64,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: a lease payment was received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMade {
    pub contract_id: ContractId,
    pub payment_number: u32,
    pub amount_minor: u64,
    pub principal_minor: u64,
    pub interest_minor: u64,
    pub paid_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: the lease liability for a period was calculated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiabilityCalculated {
    pub contract_id: ContractId,
    /// Accounting period, `YYYY-MM`.
    pub period: String,
    pub liability_minor: u64,
    pub interest_expense_minor: u64,
    /// Discount rate in basis points.
    pub discount_rate_bps: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Lease accounting events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LeaseEvent {
    ContractCreated(ContractCreated),
    PaymentMade(PaymentMade),
    LiabilityCalculated(LiabilityCalculated),
}

impl LeaseEvent {
    pub fn contract_id(&self) -> &ContractId {
        match self {
            LeaseEvent::ContractCreated(e) => &e.contract_id,
            LeaseEvent::PaymentMade(e) => &e.contract_id,
            LeaseEvent::LiabilityCalculated(e) => &e.contract_id,
        }
    }
}

impl DomainEvent for LeaseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LeaseEvent::ContractCreated(_) => "leasing.contract.created",
            LeaseEvent::PaymentMade(_) => "leasing.payment.made",
            LeaseEvent::LiabilityCalculated(_) => "leasing.liability.calculated",
        }
    }

    fn aggregate_type(&self) -> &'static str {
        "leasing.contract"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LeaseEvent::ContractCreated(e) => e.occurred_at,
            LeaseEvent::PaymentMade(e) => e.occurred_at,
            LeaseEvent::LiabilityCalculated(e) => e.occurred_at,
        }
    }
}
