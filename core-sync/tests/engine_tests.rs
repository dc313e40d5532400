//! Engine behaviour under paused time: timers, the re-entrancy guard,
//! retry ceiling and status reporting.

use bridge_traits::time::{Clock, ManualClock};
use chrono::{DateTime, TimeZone, Utc};
use core_auth::{Credential, CredentialProvider, IdentityId};
use core_library::{
    EntityStore, InMemoryLocalStore, MutationQueue, NewUnit, SyncState, Unit, UnitService,
};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_sync::{
    InMemoryRemote, RoundTripOutcome, SkipReason, StatusCategory, SyncConfig, SyncDeps,
    SyncEngine, SyncError, SyncPhase, SyncStatus, SyncTrigger,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

const USER: &str = "user-1";
const TOKEN: &str = "token-user-1";

struct TestCredentials {
    sender: watch::Sender<Option<Credential>>,
}

impl TestCredentials {
    fn signed_in() -> Self {
        let credential = Credential::new(IdentityId::new(USER).unwrap(), TOKEN, None).unwrap();
        let (sender, _) = watch::channel(Some(credential));
        Self { sender }
    }

    fn signed_out() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    fn sign_out(&self) {
        self.sender.send_replace(None);
    }
}

impl CredentialProvider for TestCredentials {
    fn current(&self) -> Option<Credential> {
        self.sender.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.sender.subscribe()
    }
}

struct Harness {
    engine: Arc<SyncEngine>,
    store: Arc<InMemoryLocalStore>,
    remote: Arc<InMemoryRemote>,
    credentials: Arc<TestCredentials>,
    units: UnitService,
    clock: Arc<ManualClock>,
    events: broadcast::Receiver<CoreEvent>,
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Periodic timer pushed far out so it does not interfere.
fn quiet_config() -> SyncConfig {
    SyncConfig {
        periodic_interval: Duration::from_secs(24 * 3600),
        ..SyncConfig::default()
    }
}

async fn harness_with(config: SyncConfig, credentials: TestCredentials) -> Harness {
    let clock = Arc::new(ManualClock::new(start_time()));
    let store = Arc::new(InMemoryLocalStore::new());
    let remote = Arc::new(InMemoryRemote::new(clock.clone()));
    remote.register_token(TOKEN, IdentityId::new(USER).unwrap());
    let credentials = Arc::new(credentials);
    let event_bus = EventBus::new(256);
    let events = event_bus.subscribe();

    let engine = SyncEngine::new(
        SyncDeps {
            store: store.clone(),
            remote: remote.clone(),
            credentials: credentials.clone(),
            clock: clock.clone(),
            event_bus,
        },
        config,
    )
    .unwrap();
    engine.start().await.unwrap();

    let units = UnitService::new(store.clone(), clock.clone()).with_listener(engine.clone());
    units.set_owner(Some(USER.to_string()));

    Harness {
        engine,
        store,
        remote,
        credentials,
        units,
        clock,
        events,
    }
}

async fn harness() -> Harness {
    let h = harness_with(quiet_config(), TestCredentials::signed_in()).await;
    h.engine.set_online(true);
    settle().await;
    h
}

/// Let spawned tasks run to their next timer.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn create_unit(h: &Harness, name: &str) -> Unit {
    h.units
        .create_unit(NewUnit {
            name: name.to_string(),
            game_system: "Warhammer 40k".to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
}

fn sync_events(events: &mut broadcast::Receiver<CoreEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Sync(event) = event {
            out.push(event);
        }
    }
    out
}

fn server_unit(id: &str, name: &str, updated_at: DateTime<Utc>) -> Unit {
    Unit {
        id: id.to_string(),
        name: name.to_string(),
        description: String::new(),
        game_system: "Age of Sigmar".to_string(),
        faction: None,
        model_count: 10,
        steps: Vec::new(),
        is_complete: false,
        thumbnail_photo_id: None,
        created_at: start_time(),
        updated_at,
        is_public: false,
        sync_state: SyncState::Local,
        last_sync_at: None,
        owner_id: Some(USER.to_string()),
    }
}

#[tokio::test(start_paused = true)]
async fn test_debounce_coalesces_rapid_mutations() {
    let h = harness().await;

    for name in ["Intercessors", "Hellblasters", "Aggressors"] {
        create_unit(&h, name).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(h.remote.push_calls(), 0);
    assert_eq!(h.engine.phase(), SyncPhase::Debouncing);

    let status = h.engine.status();
    assert_eq!(status.pending_count, 3);
    assert!(status.immediate_sync_scheduled);
    assert_eq!(status.category(), StatusCategory::Pending);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(h.remote.push_calls(), 1);
    assert_eq!(h.remote.pushed_batches()[0].len(), 3);
    assert_eq!(h.engine.phase(), SyncPhase::Idle);

    let status = h.engine.status();
    assert_eq!(status.pending_count, 0);
    assert!(!status.immediate_sync_scheduled);
    assert_eq!(status.last_sync_at, Some(h.clock.now()));
    assert_eq!(status.category(), StatusCategory::Synced);

    let local = h.store.list_units().await.unwrap();
    assert!(local.iter().all(|u| u.sync_state == SyncState::Synced));
}

#[tokio::test(start_paused = true)]
async fn test_queue_drained_in_batches_of_ten_in_order() {
    let h = harness().await;
    for i in 0..25 {
        create_unit(&h, &format!("Squad {}", i)).await;
    }
    let queued: Vec<String> = h
        .store
        .pending()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();

    let outcome = h.engine.force_sync_now().await.unwrap();

    let report = outcome.report().unwrap();
    assert_eq!(report.trigger, SyncTrigger::Manual);
    assert_eq!(report.push.batches, 3);
    assert_eq!(report.push.acknowledged, 25);

    let batches = h.remote.pushed_batches();
    let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![10, 10, 5]);
    assert_eq!(batches.concat(), queued);
    assert_eq!(h.store.pending_count().await.unwrap(), 0);
    assert_eq!(h.remote.unit_count(), 25);
}

#[tokio::test(start_paused = true)]
async fn test_offline_skips_without_network_calls() {
    let h = harness_with(quiet_config(), TestCredentials::signed_in()).await;
    create_unit(&h, "Terminators").await;
    let before = h.engine.status();

    let outcome = h.engine.trigger_sync().await.unwrap();

    assert_eq!(outcome, RoundTripOutcome::Skipped(SkipReason::Offline));
    assert_eq!(h.remote.push_calls(), 0);
    assert_eq!(h.remote.pull_calls(), 0);
    assert_eq!(h.engine.status(), before);
    assert_eq!(before.category(), StatusCategory::Offline);

    // The debounce expires offline and does nothing either.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.remote.push_calls(), 0);
    assert_eq!(h.store.pending_count().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_starts_round_trip() {
    let h = harness_with(quiet_config(), TestCredentials::signed_in()).await;
    create_unit(&h, "Terminators").await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.remote.push_calls(), 0);

    h.engine.set_online(true);
    settle().await;

    assert_eq!(h.remote.push_calls(), 1);
    assert_eq!(h.engine.status().category(), StatusCategory::Synced);
}

#[tokio::test(start_paused = true)]
async fn test_second_start_refused_while_syncing() {
    let h = harness().await;
    create_unit(&h, "Sanguinary Guard").await;
    let pulls_before = h.remote.pull_calls();
    h.remote.set_latency(Some(Duration::from_secs(5)));

    let engine = h.engine.clone();
    let first = tokio::spawn(async move { engine.force_sync_now().await });
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.engine.phase(), SyncPhase::Syncing);
    assert!(h.engine.status().syncing);
    assert!(!h.engine.status().can_retry_manually());

    let requested = h.engine.trigger_sync().await.unwrap();
    assert_eq!(requested, RoundTripOutcome::Skipped(SkipReason::AlreadySyncing));
    let forced = h.engine.force_sync_now().await.unwrap();
    assert_eq!(forced, RoundTripOutcome::Skipped(SkipReason::AlreadySyncing));
    let login = h.engine.on_login_completed().await.unwrap();
    assert_eq!(login, RoundTripOutcome::Skipped(SkipReason::AlreadySyncing));

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.report().unwrap().push.acknowledged, 1);
    assert_eq!(h.remote.push_calls(), 1);
    assert_eq!(h.remote.pull_calls(), pulls_before + 1);
    assert!(!h.engine.status().syncing);
}

#[tokio::test(start_paused = true)]
async fn test_mutation_during_round_trip_is_pushed_afterwards() {
    let h = harness().await;
    create_unit(&h, "First").await;
    h.remote.set_latency(Some(Duration::from_secs(5)));

    let engine = h.engine.clone();
    let first = tokio::spawn(async move { engine.force_sync_now().await });
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Debounce expires at +2s while the round-trip still runs.
    create_unit(&h, "Second").await;
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.report().unwrap().push.queued, 1);
    assert_eq!(h.remote.unit_count(), 1);
    assert_eq!(h.engine.phase(), SyncPhase::Debouncing);
    assert!(h.engine.status().immediate_sync_scheduled);

    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(h.remote.unit_count(), 2);
    assert_eq!(h.engine.status().pending_count, 0);
    assert_eq!(h.engine.phase(), SyncPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_record_dropped_after_three_attempts() {
    let mut h = harness().await;
    let unit = create_unit(&h, "Deathwing Knights").await;
    h.remote.reject_entity(&unit.id, "validation failed");
    let last_clean_sync = h.engine.status().last_sync_at;

    let first = h.engine.force_sync_now().await.unwrap();
    let report = first.report().unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.push.failed, 1);

    let status = h.engine.status();
    assert_eq!(status.failed_count, 1);
    assert_eq!(status.pending_count, 1);
    assert_eq!(status.last_sync_at, last_clean_sync);
    assert_eq!(status.category(), StatusCategory::Failed);
    assert_eq!(h.engine.phase(), SyncPhase::BackoffWait);
    assert_eq!(h.store.pending().await.unwrap()[0].retry_count, 1);

    h.engine.force_sync_now().await.unwrap();
    assert_eq!(h.store.pending().await.unwrap()[0].retry_count, 2);

    let third = h.engine.force_sync_now().await.unwrap();
    let exhausted = &third.report().unwrap().push.exhausted;
    assert_eq!(exhausted.len(), 1);
    assert_eq!(exhausted[0].retry_count, 3);

    assert_eq!(h.store.pending_count().await.unwrap(), 0);
    let status = h.engine.status();
    assert_eq!(status.exhausted_count, 1);
    assert_eq!(status.pending_count, 0);
    assert_eq!(status.category(), StatusCategory::Failed);

    // The local copy keeps its edit but never reached the server.
    let local = h.store.get_unit(&unit.id).await.unwrap().unwrap();
    assert_eq!(local.sync_state, SyncState::Local);
    assert!(h.remote.unit(&unit.id).is_none());

    let events = sync_events(&mut h.events);
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::RecordsExhausted { entity_ids, .. } if entity_ids == &vec![unit.id.clone()]
    )));

    // Nothing left to fail, so the next round-trip is clean.
    let fourth = h.engine.force_sync_now().await.unwrap();
    assert!(fourth.report().unwrap().is_clean());
    assert_eq!(h.engine.status().category(), StatusCategory::Synced);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_timer_retries_failed_push() {
    let h = harness().await;
    create_unit(&h, "Outriders").await;
    h.remote.fail_next_pushes(1);

    h.engine.force_sync_now().await.unwrap();
    assert_eq!(h.engine.phase(), SyncPhase::BackoffWait);
    assert_eq!(h.remote.push_calls(), 1);

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(h.remote.push_calls(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.remote.push_calls(), 2);
    assert_eq!(h.engine.phase(), SyncPhase::Idle);
    assert_eq!(h.engine.status().category(), StatusCategory::Synced);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_up_to_ceiling_and_resets() {
    let config = SyncConfig {
        max_retry_count: 10,
        ..quiet_config()
    };
    let mut h = harness_with(config, TestCredentials::signed_in()).await;
    h.engine.set_online(true);
    settle().await;
    create_unit(&h, "Eradicators").await;
    h.remote.fail_next_pushes(5);

    for _ in 0..6 {
        h.engine.force_sync_now().await.unwrap();
    }

    let delays: Vec<(u32, u64)> = sync_events(&mut h.events)
        .into_iter()
        .filter_map(|e| match e {
            SyncEvent::RoundTripFailed {
                consecutive_failures,
                retry_in_secs,
                ..
            } => Some((consecutive_failures, retry_in_secs)),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![(1, 60), (2, 120), (3, 240), (4, 300), (5, 300)]
    );
    assert_eq!(h.engine.phase(), SyncPhase::Idle);
    assert_eq!(h.engine.status().failed_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_timer_pulls_when_idle() {
    let h = harness_with(SyncConfig::default(), TestCredentials::signed_in()).await;
    h.engine.set_online(true);
    settle().await;
    let after_reconnect = h.remote.pull_calls();

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(h.remote.pull_calls(), after_reconnect + 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.remote.pull_calls(), after_reconnect + 2);
}

#[tokio::test(start_paused = true)]
async fn test_pull_merges_last_writer_wins() {
    let h = harness().await;
    let t = start_time();
    let hour = chrono::Duration::hours(1);

    h.store.upsert_unit(&server_unit("newer-remote", "Local", t)).await.unwrap();
    h.store.upsert_unit(&server_unit("tie", "Local", t)).await.unwrap();
    h.store.upsert_unit(&server_unit("older-remote", "Local", t)).await.unwrap();

    h.remote.seed_unit(server_unit("newer-remote", "Server", t + hour));
    h.remote.seed_unit(server_unit("tie", "Server", t));
    h.remote.seed_unit(server_unit("older-remote", "Server", t - hour));
    h.remote.seed_unit(server_unit("remote-only", "Server", t));

    let outcome = h.engine.force_sync_now().await.unwrap();
    let merge = outcome.report().unwrap().merge.unwrap();
    assert_eq!(merge.inserted, 1);
    assert_eq!(merge.overwritten, 1);
    assert_eq!(merge.kept_local, 2);

    let name = |id: &'static str| {
        let store = h.store.clone();
        async move { store.get_unit(id).await.unwrap().unwrap() }
    };
    let newer = name("newer-remote").await;
    assert_eq!(newer.name, "Server");
    assert_eq!(newer.sync_state, SyncState::Synced);
    assert_eq!(name("tie").await.name, "Local");
    assert_eq!(name("older-remote").await.name, "Local");
    assert_eq!(name("remote-only").await.sync_state, SyncState::Synced);

    // Merged writes never queue a push.
    assert_eq!(h.store.pending_count().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pull_failure_keeps_round_trip_clean() {
    let h = harness().await;
    create_unit(&h, "Bladeguard").await;
    h.remote.fail_next_pulls(1);

    let outcome = h.engine.force_sync_now().await.unwrap();
    let report = outcome.report().unwrap();

    assert!(report.is_clean());
    assert!(report.merge.is_none());
    assert!(report.pull_error.is_some());
    assert!(h.engine.status().last_sync_at.is_some());
    assert_eq!(h.engine.phase(), SyncPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_login_sync_resolves_with_outcome() {
    let h = harness().await;
    create_unit(&h, "Vanguard Veterans").await;

    let outcome = h.engine.on_login_completed().await.unwrap();

    let report = outcome.report().unwrap();
    assert_eq!(report.trigger, SyncTrigger::Login);
    assert_eq!(report.push.acknowledged, 1);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_sync_without_credential_is_an_error() {
    let h = harness_with(quiet_config(), TestCredentials::signed_out()).await;
    h.engine.set_online(true);
    settle().await;

    assert!(matches!(
        h.engine.force_sync_now().await,
        Err(SyncError::NotAuthenticated)
    ));
    assert!(matches!(
        h.engine.on_login_completed().await,
        Err(SyncError::NotAuthenticated)
    ));
    assert_eq!(
        h.engine.trigger_sync().await.unwrap(),
        RoundTripOutcome::Skipped(SkipReason::NotAuthenticated)
    );
    assert_eq!(h.remote.push_calls() + h.remote.pull_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_disarms_timers() {
    let h = harness().await;
    create_unit(&h, "Reivers").await;
    assert_eq!(h.engine.phase(), SyncPhase::Debouncing);

    h.credentials.sign_out();
    settle().await;

    assert_eq!(h.engine.phase(), SyncPhase::Idle);
    assert!(!h.engine.status().immediate_sync_scheduled);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.remote.push_calls(), 0);
    assert_eq!(h.store.pending_count().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_subscribers_follow_round_trip() {
    let h = harness().await;
    let seen: Arc<Mutex<Vec<SyncStatus>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let subscription = h.engine.subscribe(move |status| sink.lock().unwrap().push(status.clone()));

    create_unit(&h, "Inceptors").await;
    h.engine.force_sync_now().await.unwrap();

    let categories: Vec<StatusCategory> =
        seen.lock().unwrap().iter().map(SyncStatus::category).collect();
    assert_eq!(categories.first(), Some(&StatusCategory::Pending));
    assert!(categories.contains(&StatusCategory::Syncing));
    assert_eq!(categories.last(), Some(&StatusCategory::Synced));

    subscription.unsubscribe();
    let count = seen.lock().unwrap().len();
    create_unit(&h, "Suppressors").await;
    assert_eq!(seen.lock().unwrap().len(), count);
}

#[tokio::test(start_paused = true)]
async fn test_start_restores_pending_count_from_queue() {
    let h = harness().await;
    h.engine.set_online(false);
    create_unit(&h, "Scouts").await;
    create_unit(&h, "Sternguard").await;
    h.engine.shutdown();

    let restarted = SyncEngine::new(
        SyncDeps {
            store: h.store.clone(),
            remote: h.remote.clone(),
            credentials: h.credentials.clone(),
            clock: h.clock.clone(),
            event_bus: EventBus::new(16),
        },
        quiet_config(),
    )
    .unwrap();
    restarted.start().await.unwrap();

    assert_eq!(restarted.status().pending_count, 2);
    assert_eq!(restarted.status().category(), StatusCategory::Offline);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_skips_further_round_trips() {
    let h = harness().await;
    create_unit(&h, "Incursors").await;
    h.engine.shutdown();

    let outcome = h.engine.trigger_sync().await.unwrap();
    assert_eq!(outcome, RoundTripOutcome::Skipped(SkipReason::ShuttingDown));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.remote.push_calls(), 0);
}

#[test]
fn test_invalid_config_rejected() {
    let config = SyncConfig {
        batch_size: 0,
        ..SyncConfig::default()
    };
    let result = SyncEngine::new(
        SyncDeps {
            store: Arc::new(InMemoryLocalStore::new()),
            remote: Arc::new(InMemoryRemote::default()),
            credentials: Arc::new(TestCredentials::signed_out()),
            clock: Arc::new(ManualClock::new(start_time())),
            event_bus: EventBus::new(4),
        },
        config,
    );
    assert!(matches!(result, Err(SyncError::Config(_))));
}
