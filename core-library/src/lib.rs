//! # Workshop Library
//!
//! Owns the local copy of the user's units and the durable queue of
//! mutations waiting to reach the server.
//!
//! ## Overview
//!
//! - [`models`]: units, steps, paints, photos and [`MutationRecord`]
//! - [`store`]: [`EntityStore`], [`MutationQueue`] and [`LocalStore`] with
//!   SQLite and in-memory implementations
//! - [`db`]: pool setup and embedded migrations
//! - [`service`]: [`UnitService`], the UI's write path

pub mod db;
pub mod error;
pub mod models;
pub mod service;
pub mod store;

pub use error::{LibraryError, Result};
pub use models::{
    Brush, EntityType, LocalChange, MutationAction, MutationRecord, NewStep, NewUnit, Paint,
    PaintMix, Photo, PhotoKind, StorageStats, Step, SyncState, SyncStateSummary, Unit,
};
pub use service::{MutationListener, UnitService};
pub use store::{
    EntityStore, InMemoryLocalStore, LocalStore, MutationQueue, SqliteLocalStore,
};
