//! # Loopback Remote
//!
//! An in-process [`RemoteClient`] that applies pushed batches the way the
//! workshop server does. Useful for tests, demos and running the engine
//! with no backend.
//!
//! Apply rules per record:
//! - unit `create` / `update`: idempotent upsert by id, owner pinned to
//!   the caller, stored as `synced` with a server `lastSyncAt`
//! - unit `delete`: remove by id; deleting a missing unit is fine
//! - anything else: accepted and counted as processed, not applied
//! - a payload naming another owner is rejected for that record only

use crate::error::{Result, SyncError};
use crate::remote::{FailedRecord, PushOutcome, RemoteClient, RemoteUnit};
use async_trait::async_trait;
use bridge_traits::time::{Clock, SystemClock};
use core_auth::IdentityId;
use core_library::{EntityType, MutationAction, MutationRecord, SyncState, Unit};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
struct Inner {
    tokens: HashMap<String, IdentityId>,
    units: BTreeMap<String, Unit>,
    rejected_entities: HashMap<String, String>,
    failing_pushes: usize,
    failing_pulls: usize,
    latency: Option<Duration>,
    push_calls: usize,
    pull_calls: usize,
    pushed_batches: Vec<Vec<String>>,
}

pub struct InMemoryRemote {
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryRemote {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept `token` as proof of `identity`.
    pub fn register_token(&self, token: impl Into<String>, identity: IdentityId) {
        self.lock().tokens.insert(token.into(), identity);
    }

    /// Place a unit on the server side directly.
    pub fn seed_unit(&self, unit: Unit) {
        self.lock().units.insert(unit.id.clone(), unit);
    }

    pub fn unit(&self, id: &str) -> Option<Unit> {
        self.lock().units.get(id).cloned()
    }

    pub fn unit_count(&self) -> usize {
        self.lock().units.len()
    }

    /// Reject every record targeting `entity_id` with `message`.
    pub fn reject_entity(&self, entity_id: impl Into<String>, message: impl Into<String>) {
        self.lock()
            .rejected_entities
            .insert(entity_id.into(), message.into());
    }

    /// Fail the next `count` push requests at the transport level.
    pub fn fail_next_pushes(&self, count: usize) {
        self.lock().failing_pushes = count;
    }

    pub fn fail_next_pulls(&self, count: usize) {
        self.lock().failing_pulls = count;
    }

    /// Delay every request by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    pub fn push_calls(&self) -> usize {
        self.lock().push_calls
    }

    pub fn pull_calls(&self) -> usize {
        self.lock().pull_calls
    }

    /// Record ids of every push request received, in order.
    pub fn pushed_batches(&self) -> Vec<Vec<String>> {
        self.lock().pushed_batches.clone()
    }

    fn authenticate(inner: &Inner, token: &str) -> Result<IdentityId> {
        inner
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| SyncError::Transport("401 Unauthorized".to_string()))
    }

    async fn simulate_latency(&self) {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn apply(&self, inner: &mut Inner, record: &MutationRecord, caller: &IdentityId) -> Result<()> {
        if let Some(owner) = record.declared_owner() {
            if owner != caller.as_str() {
                return Err(SyncError::Rejected(
                    "Forbidden: record owner does not match authenticated user".to_string(),
                ));
            }
        }

        if let Some(message) = record
            .entity_id()
            .and_then(|id| inner.rejected_entities.get(id))
        {
            return Err(SyncError::Rejected(message.clone()));
        }

        match (record.entity_type, record.action) {
            (EntityType::Unit, MutationAction::Create | MutationAction::Update) => {
                let mut unit = record
                    .unit_snapshot()?
                    .ok_or_else(|| SyncError::InvalidPayload("missing unit snapshot".into()))?;
                unit.owner_id = Some(caller.to_string());
                unit.sync_state = SyncState::Synced;
                unit.last_sync_at = Some(self.clock.now());
                inner.units.insert(unit.id.clone(), unit);
            }
            (EntityType::Unit, MutationAction::Delete) => {
                let id = record
                    .entity_id()
                    .ok_or_else(|| SyncError::InvalidPayload("delete without id".into()))?;
                inner.units.remove(id);
            }
            (entity_type, action) => {
                debug!(
                    record_id = %record.id,
                    entity_type = %entity_type,
                    action = %action,
                    "Accepted record type the server does not apply yet"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteClient for InMemoryRemote {
    async fn push_batch(&self, records: &[MutationRecord], token: &str) -> Result<PushOutcome> {
        self.simulate_latency().await;

        let mut inner = self.lock();
        inner.push_calls += 1;
        inner
            .pushed_batches
            .push(records.iter().map(|r| r.id.clone()).collect());

        if inner.failing_pushes > 0 {
            inner.failing_pushes -= 1;
            return Err(SyncError::Transport("503 Service Unavailable".to_string()));
        }
        let caller = Self::authenticate(&inner, token)?;

        let mut outcome = PushOutcome::default();
        for record in records {
            match self.apply(&mut inner, record, &caller) {
                Ok(()) => outcome.processed_count += 1,
                Err(e) => outcome.failed.push(FailedRecord {
                    record: record.clone(),
                    error_message: match e {
                        SyncError::Rejected(message) => message,
                        other => other.to_string(),
                    },
                }),
            }
        }
        Ok(outcome)
    }

    async fn pull_units(
        &self,
        token: &str,
        owner: &IdentityId,
        page_size: u32,
    ) -> Result<Vec<RemoteUnit>> {
        self.simulate_latency().await;

        let mut inner = self.lock();
        inner.pull_calls += 1;

        if inner.failing_pulls > 0 {
            inner.failing_pulls -= 1;
            return Err(SyncError::Transport("502 Bad Gateway".to_string()));
        }
        let caller = Self::authenticate(&inner, token)?;
        if &caller != owner {
            return Err(SyncError::Rejected("Forbidden".to_string()));
        }

        inner
            .units
            .values()
            .filter(|unit| unit.owner_id.as_deref() == Some(owner.as_str()))
            .take(page_size as usize)
            .map(|unit| {
                serde_json::to_value(unit)
                    .map(RemoteUnit)
                    .map_err(|e| SyncError::InvalidPayload(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::ManualClock;
    use chrono::{TimeZone, Utc};

    fn unit(id: &str, owner: Option<&str>) -> Unit {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Unit {
            id: id.to_string(),
            name: "Blightlords".to_string(),
            description: String::new(),
            game_system: "Warhammer 40k".to_string(),
            faction: None,
            model_count: 5,
            steps: Vec::new(),
            is_complete: false,
            thumbnail_photo_id: None,
            created_at: now,
            updated_at: now,
            is_public: false,
            sync_state: SyncState::Local,
            last_sync_at: None,
            owner_id: owner.map(str::to_string),
        }
    }

    fn remote() -> InMemoryRemote {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
        ));
        let remote = InMemoryRemote::new(clock);
        remote.register_token("tok", IdentityId::new("user-1").unwrap());
        remote
    }

    fn record(action: MutationAction, unit: &Unit) -> MutationRecord {
        MutationRecord::for_unit(action, unit, unit.updated_at).unwrap()
    }

    #[tokio::test]
    async fn test_create_is_idempotent_and_pins_owner() {
        let remote = remote();
        let u = unit("u1", None);
        let batch = vec![
            record(MutationAction::Create, &u),
            record(MutationAction::Create, &u),
        ];

        let outcome = remote.push_batch(&batch, "tok").await.unwrap();

        assert_eq!(outcome.processed_count, 2);
        assert_eq!(remote.unit_count(), 1);
        let stored = remote.unit("u1").unwrap();
        assert_eq!(stored.owner_id.as_deref(), Some("user-1"));
        assert_eq!(stored.sync_state, SyncState::Synced);
        assert!(stored.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_owner_mismatch_rejects_only_that_record() {
        let remote = remote();
        let batch = vec![
            record(MutationAction::Create, &unit("mine", Some("user-1"))),
            record(MutationAction::Create, &unit("theirs", Some("user-2"))),
            record(MutationAction::Update, &unit("also-mine", None)),
        ];

        let outcome = remote.push_batch(&batch, "tok").await.unwrap();

        assert_eq!(outcome.processed_count, 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].record.entity_id(), Some("theirs"));
        assert!(outcome.failed[0].error_message.starts_with("Forbidden"));
        assert!(remote.unit("theirs").is_none());
    }

    #[tokio::test]
    async fn test_delete_of_missing_unit_succeeds() {
        let remote = remote();
        let delete = MutationRecord::for_unit_delete("ghost", None, Utc::now());

        let outcome = remote.push_batch(&[delete], "tok").await.unwrap();
        assert_eq!(outcome.processed_count, 1);
        assert!(outcome.failed.is_empty());
    }

    #[tokio::test]
    async fn test_unapplied_entity_types_count_as_processed() {
        let remote = remote();
        let mut step = record(MutationAction::Create, &unit("u1", None));
        step.entity_type = EntityType::Step;

        let outcome = remote.push_batch(&[step], "tok").await.unwrap();
        assert_eq!(outcome.processed_count, 1);
        assert_eq!(remote.unit_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_token_is_transport_error() {
        let remote = remote();
        let result = remote
            .push_batch(&[record(MutationAction::Create, &unit("u1", None))], "nope")
            .await;
        assert!(matches!(result, Err(SyncError::Transport(_))));
    }

    #[tokio::test]
    async fn test_pull_returns_only_owned_units() {
        let remote = remote();
        remote.seed_unit(unit("a", Some("user-1")));
        remote.seed_unit(unit("b", Some("user-2")));
        remote.seed_unit(unit("c", Some("user-1")));

        let owner = IdentityId::new("user-1").unwrap();
        let pulled = remote.pull_units("tok", &owner, 1000).await.unwrap();
        let ids: Vec<&str> = pulled.iter().filter_map(RemoteUnit::id).collect();
        assert_eq!(ids, vec!["a", "c"]);

        let first_page = remote.pull_units("tok", &owner, 1).await.unwrap();
        assert_eq!(first_page.len(), 1);
    }
}
