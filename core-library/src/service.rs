//! # Unit Service
//!
//! The entity-mutation path used by the UI. Every write lands in the local
//! store together with a full-snapshot [`MutationRecord`], then pokes the
//! registered [`MutationListener`] so the sync engine can debounce a push.

use crate::error::{LibraryError, Result};
use crate::models::{
    LocalChange, MutationAction, MutationRecord, NewStep, NewUnit, StorageStats, Step, SyncState,
    SyncStateSummary, Unit,
};
use crate::store::LocalStore;
use bridge_traits::time::Clock;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Notified after each committed local mutation.
pub trait MutationListener: Send + Sync {
    fn on_local_mutation(&self);
}

pub struct UnitService {
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    listener: Option<Arc<dyn MutationListener>>,
    owner: RwLock<Option<String>>,
}

impl UnitService {
    pub fn new(store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            listener: None,
            owner: RwLock::new(None),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn MutationListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Identity stamped on units created from now on.
    pub fn set_owner(&self, owner_id: Option<String>) {
        if let Ok(mut owner) = self.owner.write() {
            *owner = owner_id;
        }
    }

    fn owner(&self) -> Option<String> {
        self.owner.read().ok().and_then(|owner| owner.clone())
    }

    pub async fn get_unit(&self, id: &str) -> Result<Option<Unit>> {
        self.store.get_unit(id).await
    }

    pub async fn list_units(&self) -> Result<Vec<Unit>> {
        self.store.list_units().await
    }

    #[instrument(skip(self, new_unit), fields(name = %new_unit.name))]
    pub async fn create_unit(&self, new_unit: NewUnit) -> Result<Unit> {
        let now = self.clock.now();
        let unit = Unit {
            id: Uuid::new_v4().to_string(),
            name: new_unit.name.trim().to_string(),
            description: new_unit.description,
            game_system: new_unit.game_system.trim().to_string(),
            faction: new_unit.faction,
            model_count: new_unit.model_count,
            steps: Vec::new(),
            is_complete: false,
            thumbnail_photo_id: None,
            created_at: now,
            updated_at: now,
            is_public: new_unit.is_public,
            sync_state: SyncState::Local,
            last_sync_at: None,
            owner_id: self.owner(),
        };
        validate(&unit)?;

        self.commit(MutationAction::Create, unit).await
    }

    /// Save an edited unit.
    ///
    /// `created_at` and the owner are taken from the stored copy, and
    /// `updated_at` always moves forward even if the wall clock did not.
    #[instrument(skip(self, unit), fields(unit_id = %unit.id))]
    pub async fn update_unit(&self, mut unit: Unit) -> Result<Unit> {
        let previous = self.require(&unit.id).await?;

        unit.created_at = previous.created_at;
        unit.owner_id = previous.owner_id.or(unit.owner_id);
        unit.updated_at = next_updated_at(self.clock.now(), previous.updated_at);
        validate(&unit)?;

        self.commit(MutationAction::Update, unit).await
    }

    /// Append a painting step. Numbering continues from the last step.
    #[instrument(skip(self, new_step))]
    pub async fn add_step(&self, unit_id: &str, new_step: NewStep) -> Result<Unit> {
        let mut unit = self.require(unit_id).await?;
        let now = self.clock.now();

        let step_number = unit
            .steps
            .iter()
            .map(|s| s.step_number)
            .max()
            .unwrap_or(0)
            + 1;
        unit.steps.push(Step {
            id: Uuid::new_v4().to_string(),
            step_number,
            technique: new_step.technique,
            description: new_step.description,
            timestamp: now,
            paints: new_step.paints,
            paint_mix: new_step.paint_mix,
            brushes: new_step.brushes,
            other_tools: new_step.other_tools,
            photos: new_step.photos,
            applied_to_models: new_step.applied_to_models,
        });
        unit.updated_at = next_updated_at(now, unit.updated_at);

        self.commit(MutationAction::Update, unit).await
    }

    /// Delete a unit and queue the delete.
    ///
    /// Returns `Ok(false)` without queueing anything when the id is unknown.
    #[instrument(skip(self))]
    pub async fn delete_unit(&self, id: &str) -> Result<bool> {
        let Some(existing) = self.store.get_unit(id).await? else {
            return Ok(false);
        };

        let record =
            MutationRecord::for_unit_delete(id, existing.owner_id.as_deref(), self.clock.now());
        self.store
            .record_mutation(LocalChange::Delete(id.to_string()), &record)
            .await?;

        info!(unit_id = %id, record_id = %record.id, "Unit deleted locally");
        self.notify();
        Ok(true)
    }

    pub async fn storage_stats(&self) -> Result<StorageStats> {
        self.store.storage_stats().await
    }

    pub async fn sync_state_summary(&self) -> Result<SyncStateSummary> {
        self.store.sync_state_summary().await
    }

    async fn require(&self, id: &str) -> Result<Unit> {
        self.store
            .get_unit(id)
            .await?
            .ok_or_else(|| LibraryError::NotFound {
                entity_type: "Unit".to_string(),
                id: id.to_string(),
            })
    }

    async fn commit(&self, action: MutationAction, unit: Unit) -> Result<Unit> {
        let record = MutationRecord::for_unit(action, &unit, self.clock.now())?;
        self.store
            .record_mutation(LocalChange::Upsert(unit.clone()), &record)
            .await?;

        debug!(
            unit_id = %unit.id,
            record_id = %record.id,
            action = %action,
            "Unit mutation queued"
        );
        self.notify();
        Ok(unit)
    }

    fn notify(&self) {
        if let Some(listener) = &self.listener {
            listener.on_local_mutation();
        }
    }
}

fn validate(unit: &Unit) -> Result<()> {
    unit.validate().map_err(|message| LibraryError::InvalidInput {
        field: "unit".to_string(),
        message,
    })
}

/// `max(now, previous + 1ms)`
fn next_updated_at(now: DateTime<Utc>, previous: DateTime<Utc>) -> DateTime<Utc> {
    now.max(previous + Duration::milliseconds(1))
}
