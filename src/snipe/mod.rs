pub mod client;
pub mod payload;
pub mod retry;

pub use client::{Asset, AssignedUser, Model, Rows, Snipe, User};
pub use payload::{build_asset_payload, AssetPayload};
