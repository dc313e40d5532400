//! In-process [`LocalStore`] backed by a `HashMap` and a `Vec`.

use super::{validate_unit, EntityStore, LocalStore, MutationQueue};
use crate::error::Result;
use crate::models::{LocalChange, MutationRecord, SyncState, Unit};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    units: HashMap<String, Unit>,
    queue: Vec<MutationRecord>,
}

/// Non-durable store for tests and throwaway sessions.
#[derive(Default)]
pub struct InMemoryLocalStore {
    inner: Mutex<Inner>,
}

impl InMemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for InMemoryLocalStore {
    async fn get_unit(&self, id: &str) -> Result<Option<Unit>> {
        Ok(self.inner.lock().await.units.get(id).cloned())
    }

    async fn list_units(&self) -> Result<Vec<Unit>> {
        let mut units: Vec<Unit> = self.inner.lock().await.units.values().cloned().collect();
        units.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(units)
    }

    async fn upsert_unit(&self, unit: &Unit) -> Result<()> {
        validate_unit(unit)?;
        self.inner
            .lock()
            .await
            .units
            .insert(unit.id.clone(), unit.clone());
        Ok(())
    }

    async fn delete_unit(&self, id: &str) -> Result<bool> {
        Ok(self.inner.lock().await.units.remove(id).is_some())
    }

    async fn set_sync_state(&self, id: &str, state: SyncState) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.units.get_mut(id) {
            Some(unit) => {
                unit.sync_state = state;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl MutationQueue for InMemoryLocalStore {
    async fn enqueue(&self, record: &MutationRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        // Same id replaces in place, like the keyed SQLite row.
        match inner.queue.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => inner.queue.push(record.clone()),
        }
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<MutationRecord>> {
        Ok(self.inner.lock().await.queue.clone())
    }

    async fn update_record(&self, record: &MutationRecord) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.queue.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_record(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.queue.len();
        inner.queue.retain(|r| r.id != id);
        Ok(inner.queue.len() != before)
    }

    async fn pending_count(&self) -> Result<usize> {
        Ok(self.inner.lock().await.queue.len())
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn record_mutation(&self, change: LocalChange, record: &MutationRecord) -> Result<()> {
        if let LocalChange::Upsert(unit) = &change {
            validate_unit(unit)?;
        }
        let mut inner = self.inner.lock().await;
        match change {
            LocalChange::Upsert(unit) => {
                inner.units.insert(unit.id.clone(), unit);
            }
            LocalChange::Delete(id) => {
                inner.units.remove(&id);
            }
        }
        inner.queue.push(record.clone());
        Ok(())
    }
}
