//! # Workshop API Provider
//!
//! Implements the sync engine's `RemoteClient` for the workshop backend.
//!
//! ## Overview
//!
//! This module provides:
//! - Batched mutation push (`POST /sync`) with per-record failures
//! - Unit pull for the signed-in user (`GET /units?scope=user`)
//! - Status and envelope error mapping into `SyncError`

pub mod client;
pub mod error;
pub mod types;

pub use client::WorkshopApiClient;
pub use error::{Result, WorkshopApiError};
