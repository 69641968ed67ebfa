//! `aurum-leasing` — lease accounting domain events.

pub mod events;

pub use events::{ContractCreated, ContractId, LeaseEvent, LiabilityCalculated, PaymentMade};
