//! `aurum-assets` — fixed-asset domain events.

pub mod events;

pub use events::{
    AssetCategoryChanged, AssetCreated, AssetDisposed, AssetEvent, AssetId, AssetRevalued,
    DisposalMethod,
};
