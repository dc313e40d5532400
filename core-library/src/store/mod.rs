//! # Local Store
//!
//! Durable home of units and of the outbound mutation queue.
//!
//! - [`EntityStore`]: units by id, listing, sync-state flips
//! - [`MutationQueue`]: FIFO queue of [`MutationRecord`]s
//! - [`LocalStore`]: both, plus the atomic "change entity and enqueue"
//!   write used by the UI mutation path
//!
//! Two implementations ship: [`SqliteLocalStore`] for real use and
//! [`InMemoryLocalStore`] for tests and ephemeral sessions.
//!
//! Writes that come from a pull go through [`EntityStore::upsert_unit`]
//! only and never touch the queue.

use crate::error::{LibraryError, Result};
use crate::models::{
    LocalChange, MutationRecord, StorageStats, SyncState, SyncStateSummary, Unit,
};
use async_trait::async_trait;

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryLocalStore;
pub use sqlite::SqliteLocalStore;

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_unit(&self, id: &str) -> Result<Option<Unit>>;

    /// All units, most recently updated first.
    async fn list_units(&self) -> Result<Vec<Unit>>;

    /// Insert or replace by id. Does not enqueue anything.
    async fn upsert_unit(&self, unit: &Unit) -> Result<()>;

    /// # Returns
    /// - `Ok(true)` if the unit was deleted
    /// - `Ok(false)` if it did not exist
    async fn delete_unit(&self, id: &str) -> Result<bool>;

    /// Flip the tag on a stored unit. `Ok(false)` when the id is unknown.
    async fn set_sync_state(&self, id: &str, state: SyncState) -> Result<bool>;
}

#[async_trait]
pub trait MutationQueue: Send + Sync {
    async fn enqueue(&self, record: &MutationRecord) -> Result<()>;

    /// Every queued record in enqueue order.
    async fn pending(&self) -> Result<Vec<MutationRecord>>;

    /// Rewrite a record in place (its queue position is kept).
    async fn update_record(&self, record: &MutationRecord) -> Result<bool>;

    async fn remove_record(&self, id: &str) -> Result<bool>;

    async fn pending_count(&self) -> Result<usize>;
}

#[async_trait]
pub trait LocalStore: EntityStore + MutationQueue {
    /// Apply a local entity change and append its queue record as one
    /// atomic write.
    async fn record_mutation(&self, change: LocalChange, record: &MutationRecord) -> Result<()>;

    async fn storage_stats(&self) -> Result<StorageStats> {
        let units = self.list_units().await?;
        Ok(StorageStats {
            unit_count: units.len(),
            step_count: units.iter().map(|u| u.steps.len()).sum(),
            photo_count: units.iter().map(Unit::photo_count).sum(),
            pending_mutations: self.pending_count().await?,
        })
    }

    async fn sync_state_summary(&self) -> Result<SyncStateSummary> {
        let units = self.list_units().await?;
        Ok(SyncStateSummary::from_units(&units))
    }
}

/// Both stores refuse the same units.
pub(crate) fn validate_unit(unit: &Unit) -> Result<()> {
    unit.validate().map_err(|message| LibraryError::InvalidInput {
        field: "unit".to_string(),
        message,
    })
}
