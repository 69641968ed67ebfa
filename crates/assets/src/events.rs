use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aurum_core::AggregateId;
use aurum_events::DomainEvent;

/// Asset identifier (the register key, e.g. `"AST-001"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub AggregateId);

impl AssetId {
    pub fn new(id: impl Into<AggregateId>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl core::fmt::Display for AssetId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// How an asset left the register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisposalMethod {
    Sold,
    Scrapped,
    Donated,
    Transferred,
}

/// Event: an asset entered the register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetCreated {
    pub asset_id: AssetId,
    pub name: String,
    pub category_id: u32,
    /// Acquisition cost in smallest currency unit (e.g., cents).
    pub cost_minor: u64,
    pub currency: String,
    pub purchase_date: DateTime<Utc>,
    pub location: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: an asset was moved to a different category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetCategoryChanged {
    pub asset_id: AssetId,
    pub previous_category_id: u32,
    pub new_category_id: u32,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: an asset was disposed of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDisposed {
    pub asset_id: AssetId,
    pub disposal_date: DateTime<Utc>,
    /// Disposal proceeds in smallest currency unit.
    pub proceeds_minor: u64,
    pub method: DisposalMethod,
    pub occurred_at: DateTime<Utc>,
}

/// Event: an asset was revalued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRevalued {
    pub asset_id: AssetId,
    pub previous_value_minor: u64,
    pub revalued_minor: u64,
    pub effective_date: DateTime<Utc>,
    pub appraiser: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Asset lifecycle events.
///
/// Internally tagged so the stored payload stays a flat JSON object with a
/// `kind` discriminator; state reconstruction folds those flat fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetEvent {
    AssetCreated(AssetCreated),
    AssetCategoryChanged(AssetCategoryChanged),
    AssetDisposed(AssetDisposed),
    AssetRevalued(AssetRevalued),
}

impl AssetEvent {
    pub fn asset_id(&self) -> &AssetId {
        match self {
            AssetEvent::AssetCreated(e) => &e.asset_id,
            AssetEvent::AssetCategoryChanged(e) => &e.asset_id,
            AssetEvent::AssetDisposed(e) => &e.asset_id,
            AssetEvent::AssetRevalued(e) => &e.asset_id,
        }
    }
}

impl DomainEvent for AssetEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AssetEvent::AssetCreated(_) => "assets.asset.created",
            AssetEvent::AssetCategoryChanged(_) => "assets.asset.category_changed",
            AssetEvent::AssetDisposed(_) => "assets.asset.disposed",
            AssetEvent::AssetRevalued(_) => "assets.asset.revalued",
        }
    }

    fn aggregate_type(&self) -> &'static str {
        "assets.asset"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AssetEvent::AssetCreated(e) => e.occurred_at,
            AssetEvent::AssetCategoryChanged(e) => e.occurred_at,
            AssetEvent::AssetDisposed(e) => e.occurred_at,
            AssetEvent::AssetRevalued(e) => e.occurred_at,
        }
    }
}
