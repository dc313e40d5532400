//! Queue and entity behaviour shared by both local stores, plus durability
//! of the SQLite queue across a reopen.

use bridge_traits::time::ManualClock;
use chrono::{DateTime, Duration, TimeZone, Utc};
use core_library::db::{create_pool, create_test_pool, DatabaseConfig};
use core_library::{
    EntityStore, InMemoryLocalStore, LocalStore, MutationAction, MutationQueue, NewStep, NewUnit,
    SqliteLocalStore, SyncState, UnitService,
};
use std::path::PathBuf;
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

async fn stores() -> Vec<(&'static str, Arc<dyn LocalStore>)> {
    let sqlite = SqliteLocalStore::new(create_test_pool().await.unwrap());
    vec![
        ("memory", Arc::new(InMemoryLocalStore::new())),
        ("sqlite", Arc::new(sqlite)),
    ]
}

fn new_unit(name: &str) -> NewUnit {
    NewUnit {
        name: name.to_string(),
        game_system: "Warhammer 40k".to_string(),
        model_count: 5,
        ..Default::default()
    }
}

struct TempDatabase(PathBuf);

impl TempDatabase {
    fn new() -> Self {
        let name = format!("workshop-store-{}.db", uuid::Uuid::new_v4());
        Self(std::env::temp_dir().join(name))
    }
}

impl Drop for TempDatabase {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut path = self.0.clone().into_os_string();
            path.push(suffix);
            let _ = std::fs::remove_file(path);
        }
    }
}

#[tokio::test]
async fn test_mutations_queue_in_order() {
    for (kind, store) in stores().await {
        let clock = Arc::new(ManualClock::new(t0()));
        let service = UnitService::new(store.clone(), clock.clone());

        let unit = service.create_unit(new_unit("Intercessors")).await.unwrap();
        clock.advance(Duration::seconds(1));
        service
            .add_step(
                &unit.id,
                NewStep {
                    description: "Prime black".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        clock.advance(Duration::seconds(1));
        assert!(service.delete_unit(&unit.id).await.unwrap());

        let queued = store.pending().await.unwrap();
        let actions: Vec<MutationAction> = queued.iter().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![
                MutationAction::Create,
                MutationAction::Update,
                MutationAction::Delete
            ],
            "{kind}"
        );
        assert!(queued.iter().all(|r| r.entity_id() == Some(unit.id.as_str())));
        assert!(store.get_unit(&unit.id).await.unwrap().is_none(), "{kind}");
        assert_eq!(store.pending_count().await.unwrap(), 3, "{kind}");
    }
}

#[tokio::test]
async fn test_retry_bookkeeping_keeps_queue_position() {
    for (kind, store) in stores().await {
        let clock = Arc::new(ManualClock::new(t0()));
        let service = UnitService::new(store.clone(), clock);
        for name in ["Hellblasters", "Eliminators", "Aggressors"] {
            service.create_unit(new_unit(name)).await.unwrap();
        }

        let mut first = store.pending().await.unwrap().remove(0);
        first.retry_count = 2;
        assert!(store.update_record(&first).await.unwrap());

        let queued = store.pending().await.unwrap();
        assert_eq!(queued[0].id, first.id, "{kind}");
        assert_eq!(queued[0].retry_count, 2, "{kind}");

        assert!(store.remove_record(&queued[1].id).await.unwrap());
        assert!(!store.remove_record(&queued[1].id).await.unwrap());
        assert_eq!(store.pending_count().await.unwrap(), 2, "{kind}");
    }
}

#[tokio::test]
async fn test_pulled_writes_do_not_enqueue() {
    for (kind, store) in stores().await {
        let clock = Arc::new(ManualClock::new(t0()));
        let service = UnitService::new(store.clone(), clock);
        let mut unit = service.create_unit(new_unit("Scouts")).await.unwrap();
        let record_id = store.pending().await.unwrap()[0].id.clone();
        store.remove_record(&record_id).await.unwrap();

        unit.name = "Scout Squad".to_string();
        unit.sync_state = SyncState::Synced;
        store.upsert_unit(&unit).await.unwrap();
        assert!(store
            .set_sync_state(&unit.id, SyncState::Conflict)
            .await
            .unwrap());
        assert!(!store
            .set_sync_state("missing", SyncState::Synced)
            .await
            .unwrap());

        let stored = store.get_unit(&unit.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Scout Squad", "{kind}");
        assert_eq!(stored.sync_state, SyncState::Conflict, "{kind}");
        assert_eq!(store.pending_count().await.unwrap(), 0, "{kind}");
    }
}

#[tokio::test]
async fn test_sqlite_queue_survives_reopen() {
    let db = TempDatabase::new();
    let clock = Arc::new(ManualClock::new(t0()));

    let unit_id = {
        let pool = create_pool(DatabaseConfig::new(&db.0)).await.unwrap();
        let store = Arc::new(SqliteLocalStore::new(pool.clone()));
        let service = UnitService::new(store, clock.clone());
        let unit = service.create_unit(new_unit("Terminators")).await.unwrap();
        service.create_unit(new_unit("Bladeguard")).await.unwrap();
        pool.close().await;
        unit.id
    };

    let pool = create_pool(DatabaseConfig::new(&db.0)).await.unwrap();
    let store = SqliteLocalStore::new(pool.clone());

    assert_eq!(store.pending_count().await.unwrap(), 2);
    let queued = store.pending().await.unwrap();
    assert_eq!(queued[0].entity_id(), Some(unit_id.as_str()));
    let snapshot = queued[0].unit_snapshot().unwrap().unwrap();
    assert_eq!(snapshot.name, "Terminators");
    assert_eq!(snapshot.sync_state, SyncState::Local);
    assert!(store.get_unit(&unit_id).await.unwrap().is_some());

    pool.close().await;
}

#[tokio::test]
async fn test_both_stores_refuse_invalid_units() {
    for (kind, store) in stores().await {
        let clock = Arc::new(ManualClock::new(t0()));
        let service = UnitService::new(store.clone(), clock);
        let mut unit = service.create_unit(new_unit("Sternguard")).await.unwrap();

        unit.name = "   ".to_string();
        assert!(store.upsert_unit(&unit).await.is_err(), "{kind}");
        assert_eq!(
            store.get_unit(&unit.id).await.unwrap().unwrap().name,
            "Sternguard",
            "{kind}"
        );
    }
}
