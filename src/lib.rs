//! Workspace umbrella crate.
//!
//! Re-exports [`core_service`] so host applications can depend on
//! `workshop-workspace` and pick the bridge adapters through features
//! instead of wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
