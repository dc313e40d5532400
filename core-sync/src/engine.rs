//! # Sync Engine
//!
//! Owns the round-trip (push the queue, then pull and merge), the timers
//! that start it, and the status record the UI watches.
//!
//! ## Phases
//!
//! - `Idle`: nothing armed
//! - `Debouncing`: a local mutation armed the short debounce timer; each
//!   further mutation re-arms it
//! - `Syncing`: a round-trip is in flight; any other start is refused
//! - `BackoffWait`: the last round-trip had failures; a retry timer is armed
//!
//! A periodic backstop timer runs independently of the phases. Timer-driven
//! round-trips only start when the device is online and a credential is
//! present. [`SyncEngine::force_sync_now`] and
//! [`SyncEngine::on_login_completed`] skip the debounce but are still
//! refused while a round-trip is running.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let engine = SyncEngine::new(deps, SyncConfig::default())?;
//! engine.start().await?;
//! engine.set_online(true);
//!
//! let _sub = engine.subscribe(|status| println!("{:?}", status.category()));
//! engine.on_login_completed().await?;
//! ```

use crate::backoff::BackoffPolicy;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::merge::{merge_pulled, MergeSummary};
use crate::push::{drain_queue, PushSummary};
use crate::remote::RemoteClient;
use crate::status::{StatusChannel, Subscription, SyncStatus};
use bridge_traits::time::Clock;
use core_auth::{Credential, CredentialProvider};
use core_library::{LocalStore, MutationListener};
use core_runtime::events::{CoreEvent, EventBus, NetworkEvent, SyncEvent};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Collaborators the engine is built from.
pub struct SyncDeps {
    pub store: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteClient>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub clock: Arc<dyn Clock>,
    pub event_bus: EventBus,
}

/// What started a round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTrigger {
    Debounce,
    Periodic,
    Backoff,
    /// Device came back online.
    Reconnect,
    /// [`SyncEngine::trigger_sync`]
    Requested,
    /// [`SyncEngine::force_sync_now`]
    Manual,
    /// [`SyncEngine::on_login_completed`]
    Login,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Debounce => "debounce",
            SyncTrigger::Periodic => "periodic",
            SyncTrigger::Backoff => "backoff",
            SyncTrigger::Reconnect => "online",
            SyncTrigger::Requested => "requested",
            SyncTrigger::Manual => "manual",
            SyncTrigger::Login => "login",
        }
    }

    /// Explicit requests report a missing credential as an error instead of
    /// skipping quietly.
    fn requires_credential(&self) -> bool {
        matches!(self, SyncTrigger::Manual | SyncTrigger::Login)
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Debouncing,
    Syncing,
    BackoffWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    NotAuthenticated,
    AlreadySyncing,
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundTripReport {
    pub trigger: SyncTrigger,
    pub push: PushSummary,
    /// `None` when the pull failed.
    pub merge: Option<MergeSummary>,
    pub pull_error: Option<String>,
    pub duration: Duration,
}

impl RoundTripReport {
    /// No record failed during the push.
    pub fn is_clean(&self) -> bool {
        self.push.failed == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoundTripOutcome {
    Completed(RoundTripReport),
    Skipped(SkipReason),
}

impl RoundTripOutcome {
    pub fn report(&self) -> Option<&RoundTripReport> {
        match self {
            RoundTripOutcome::Completed(report) => Some(report),
            RoundTripOutcome::Skipped(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            RoundTripOutcome::Completed(_) => None,
            RoundTripOutcome::Skipped(reason) => Some(*reason),
        }
    }
}

/// One-shot completion of the round-trip started by
/// [`SyncEngine::on_login_completed`].
///
/// Resolves to [`SyncError::Interrupted`] if the engine goes away before
/// the round-trip reports back.
#[must_use = "the login round-trip runs regardless; await this to observe its result"]
pub struct LoginSync {
    receiver: oneshot::Receiver<Result<RoundTripOutcome>>,
}

impl LoginSync {
    fn resolved(result: Result<RoundTripOutcome>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(result);
        Self { receiver }
    }
}

impl Future for LoginSync {
    type Output = Result<RoundTripOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SyncError::Interrupted)))
    }
}

struct Timer {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct EngineState {
    syncing: bool,
    /// A debounce fired while a round-trip was running.
    resync_requested: bool,
    consecutive_failures: u32,
    debounce: Option<Timer>,
    backoff: Option<Timer>,
    next_generation: u64,
    started: bool,
    background: Vec<JoinHandle<()>>,
}

impl EngineState {
    fn clear_timers(&mut self) {
        for timer in [self.debounce.take(), self.backoff.take()].into_iter().flatten() {
            timer.task.abort();
        }
    }
}

/// Clears the syncing flag however the round-trip ends.
struct RoundTripGuard<'a> {
    engine: &'a SyncEngine,
}

impl Drop for RoundTripGuard<'_> {
    fn drop(&mut self) {
        let resync = {
            let mut state = self.engine.state();
            state.syncing = false;
            std::mem::take(&mut state.resync_requested)
        } && !self.engine.shutdown.is_cancelled();

        if resync {
            debug!("Mutations arrived during the round-trip, re-arming debounce");
            self.engine.arm_debounce();
        }
        self.engine.status.update(|s| {
            s.syncing = false;
            if resync {
                s.immediate_sync_scheduled = true;
            }
        });
    }
}

pub struct SyncEngine {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteClient>,
    credentials: Arc<dyn CredentialProvider>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    config: SyncConfig,
    backoff: BackoffPolicy,
    status: StatusChannel,
    state: Mutex<EngineState>,
    shutdown: CancellationToken,
    me: Weak<SyncEngine>,
}

impl SyncEngine {
    pub fn new(deps: SyncDeps, config: SyncConfig) -> Result<Arc<Self>> {
        config.validate()?;

        Ok(Arc::new_cyclic(|me| Self {
            store: deps.store,
            remote: deps.remote,
            credentials: deps.credentials,
            clock: deps.clock,
            event_bus: deps.event_bus,
            backoff: BackoffPolicy::from(&config),
            config,
            status: StatusChannel::default(),
            state: Mutex::new(EngineState::default()),
            shutdown: CancellationToken::new(),
            me: me.clone(),
        }))
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the pending count from the queue and start the periodic timer
    /// and credential watcher. Calling it twice is a no-op.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        if self.state().started {
            return Ok(());
        }

        let pending = self.store.pending_count().await?;
        self.status.update(|s| s.pending_count = pending);

        let mut tasks = vec![self.spawn_credential_watcher()];
        if self.config.background_sync {
            tasks.push(self.spawn_periodic());
        }

        let mut state = self.state();
        if state.started {
            tasks.iter().for_each(JoinHandle::abort);
            return Ok(());
        }
        state.started = true;
        state.background.extend(tasks);
        info!(
            pending,
            background_sync = self.config.background_sync,
            periodic_secs = self.config.periodic_interval.as_secs(),
            "Sync engine started"
        );
        Ok(())
    }

    /// Stop every timer and background task. In-flight network calls are
    /// abandoned where they stand.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let mut state = self.state();
        state.clear_timers();
        for task in state.background.drain(..) {
            task.abort();
        }
        state.started = false;
        info!("Sync engine stopped");
    }

    pub fn status(&self) -> SyncStatus {
        self.status.snapshot()
    }

    /// Register a status callback. See [`StatusChannel::subscribe`].
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.status.subscribe(callback)
    }

    pub fn phase(&self) -> SyncPhase {
        let state = self.state();
        if state.syncing {
            SyncPhase::Syncing
        } else if state.debounce.is_some() {
            SyncPhase::Debouncing
        } else if state.backoff.is_some() {
            SyncPhase::BackoffWait
        } else {
            SyncPhase::Idle
        }
    }

    /// Record connectivity. Coming back online starts a round-trip; going
    /// offline only updates status and leaves armed timers alone.
    pub fn set_online(&self, online: bool) {
        let was_online = self.status.snapshot().online;
        self.status.update(|s| s.online = online);

        if online && !was_online {
            info!("Device came online");
            self.event_bus.emit(CoreEvent::Network(NetworkEvent::Online)).ok();
            self.spawn_round_trip(SyncTrigger::Reconnect);
        } else if !online && was_online {
            info!("Device went offline");
            self.event_bus.emit(CoreEvent::Network(NetworkEvent::Offline)).ok();
        }
    }

    /// A mutation was queued locally: count it and (re)arm the debounce.
    pub fn notify_local_mutation(&self) {
        self.status.update(|s| {
            s.pending_count += 1;
            s.immediate_sync_scheduled = true;
        });
        self.arm_debounce();
    }

    /// Run a round-trip if the device is online and signed in; otherwise
    /// skip without touching the network.
    pub async fn trigger_sync(&self) -> Result<RoundTripOutcome> {
        self.run_round_trip(SyncTrigger::Requested).await
    }

    /// Run a round-trip now, bypassing the debounce.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotAuthenticated`] without a credential, or a local
    /// store failure. Push and pull failures are reported in the outcome
    /// and the status instead.
    pub async fn force_sync_now(&self) -> Result<RoundTripOutcome> {
        self.run_round_trip(SyncTrigger::Manual).await
    }

    /// Start the post-login round-trip and hand back its completion.
    pub fn on_login_completed(&self) -> LoginSync {
        let Some(engine) = self.me.upgrade() else {
            return LoginSync::resolved(Err(SyncError::Interrupted));
        };
        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime available for the login sync");
            return LoginSync::resolved(Err(SyncError::Interrupted));
        };

        let (sender, receiver) = oneshot::channel();
        runtime.spawn(async move {
            let result = engine.run_round_trip(SyncTrigger::Login).await;
            let _ = sender.send(result);
        });
        LoginSync { receiver }
    }

    #[instrument(skip(self), fields(trigger = %trigger))]
    async fn run_round_trip(&self, trigger: SyncTrigger) -> Result<RoundTripOutcome> {
        if self.shutdown.is_cancelled() {
            return Ok(RoundTripOutcome::Skipped(SkipReason::ShuttingDown));
        }
        if !self.status.snapshot().online {
            debug!("Offline, round-trip skipped");
            return Ok(RoundTripOutcome::Skipped(SkipReason::Offline));
        }
        let Some(credential) = self.credentials.current() else {
            if trigger.requires_credential() {
                return Err(SyncError::NotAuthenticated);
            }
            debug!("No credential, round-trip skipped");
            return Ok(RoundTripOutcome::Skipped(SkipReason::NotAuthenticated));
        };

        // Check-and-set happens before the first await.
        let Some(guard) = self.begin_round_trip() else {
            debug!("Round-trip already running");
            return Ok(RoundTripOutcome::Skipped(SkipReason::AlreadySyncing));
        };

        let started = Instant::now();
        let queued = self
            .status
            .update(|s| {
                s.syncing = true;
                s.immediate_sync_scheduled = false;
            })
            .pending_count;
        self.emit(SyncEvent::RoundTripStarted {
            trigger: trigger.to_string(),
            queued_records: queued as u64,
        });

        let result = match self.push_then_pull(&credential).await {
            Ok((push, merge, pull_error)) => {
                let report = RoundTripReport {
                    trigger,
                    push,
                    merge,
                    pull_error,
                    duration: started.elapsed(),
                };
                Ok(RoundTripOutcome::Completed(self.finish(report).await))
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        };

        drop(guard);
        result
    }

    fn begin_round_trip(&self) -> Option<RoundTripGuard<'_>> {
        let mut state = self.state();
        if state.syncing {
            return None;
        }
        state.syncing = true;
        // The queue snapshot taken now covers whatever armed these.
        state.clear_timers();
        Some(RoundTripGuard { engine: self })
    }

    async fn push_then_pull(
        &self,
        credential: &Credential,
    ) -> Result<(PushSummary, Option<MergeSummary>, Option<String>)> {
        let push = drain_queue(
            self.store.as_ref(),
            self.remote.as_ref(),
            credential.token(),
            &self.config,
        )
        .await?;

        let pulled = match self
            .remote
            .pull_units(
                credential.token(),
                &credential.identity_id,
                self.config.pull_page_size,
            )
            .await
        {
            Ok(units) => merge_pulled(self.store.as_ref(), units).await,
            Err(e) => Err(e),
        };

        match pulled {
            Ok(merge) => Ok((push, Some(merge), None)),
            Err(e) => {
                warn!(error = %e, "Pull failed, keeping local data as is");
                Ok((push, None, Some(e.to_string())))
            }
        }
    }

    async fn finish(&self, report: RoundTripReport) -> RoundTripReport {
        let pending = match self.store.pending_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Could not read queue length, estimating");
                report.push.remaining()
            }
        };
        let exhausted = report.push.exhausted.len();

        if !report.push.exhausted.is_empty() {
            self.emit(SyncEvent::RecordsExhausted {
                record_ids: report.push.exhausted.iter().map(|r| r.id.clone()).collect(),
                entity_ids: report
                    .push
                    .exhausted
                    .iter()
                    .filter_map(|r| r.entity_id().map(str::to_string))
                    .collect(),
            });
        }

        if report.is_clean() {
            self.state().consecutive_failures = 0;
            let now = self.clock.now();
            self.status.update(|s| {
                s.last_sync_at = Some(now);
                s.pending_count = pending;
                s.failed_count = 0;
                s.exhausted_count += exhausted;
            });
            let merge = report.merge.unwrap_or_default();
            self.emit(SyncEvent::RoundTripCompleted {
                acknowledged: report.push.acknowledged as u64,
                pulled_inserted: merge.inserted as u64,
                pulled_overwritten: merge.overwritten as u64,
                duration_ms: report.duration.as_millis() as u64,
            });
            info!(
                acknowledged = report.push.acknowledged,
                pending,
                duration_ms = report.duration.as_millis() as u64,
                "Round-trip completed"
            );
        } else {
            let (failures, delay) = self.schedule_backoff();
            self.status.update(|s| {
                s.pending_count = pending;
                s.failed_count = report.push.failed;
                s.exhausted_count += exhausted;
            });
            self.emit(SyncEvent::RoundTripFailed {
                failed_records: report.push.failed as u64,
                message: None,
                consecutive_failures: failures,
                retry_in_secs: delay.as_secs(),
            });
            warn!(
                failed = report.push.failed,
                pending,
                consecutive_failures = failures,
                retry_in_secs = delay.as_secs(),
                "Round-trip finished with failures"
            );
        }
        report
    }

    fn fail(&self, error: &SyncError) {
        let (failures, delay) = self.schedule_backoff();
        self.emit(SyncEvent::RoundTripFailed {
            failed_records: 0,
            message: Some(error.to_string()),
            consecutive_failures: failures,
            retry_in_secs: delay.as_secs(),
        });
        warn!(
            error = %error,
            retryable = error.is_retryable(),
            consecutive_failures = failures,
            "Round-trip aborted"
        );
    }

    fn schedule_backoff(&self) -> (u32, Duration) {
        let failures = {
            let mut state = self.state();
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.consecutive_failures
        };
        let delay = self.backoff.delay_for(failures);
        self.arm_backoff(delay);
        (failures, delay)
    }

    fn arm_debounce(&self) {
        let delay = self.config.debounce;
        self.arm_timer(delay, TimerKind::Debounce);
    }

    fn arm_backoff(&self, delay: Duration) {
        self.arm_timer(delay, TimerKind::Backoff);
    }

    fn arm_timer(&self, delay: Duration, kind: TimerKind) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!(timer = ?kind, "No async runtime available, timer not armed");
            return;
        };

        let mut state = self.state();
        state.next_generation += 1;
        let generation = state.next_generation;
        let weak = self.me.clone();

        // The slot is filled before the lock is released, so the task
        // always finds its own generation there when it fires.
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(engine) = weak.upgrade() {
                engine.timer_fired(kind, generation).await;
            }
        });

        let slot = match kind {
            TimerKind::Debounce => &mut state.debounce,
            TimerKind::Backoff => &mut state.backoff,
        };
        if let Some(previous) = slot.replace(Timer { generation, task }) {
            previous.task.abort();
        }
        debug!(timer = ?kind, delay_ms = delay.as_millis() as u64, "Timer armed");
    }

    async fn timer_fired(&self, kind: TimerKind, generation: u64) {
        {
            let mut state = self.state();
            let slot = match kind {
                TimerKind::Debounce => &mut state.debounce,
                TimerKind::Backoff => &mut state.backoff,
            };
            if slot.as_ref().map(|t| t.generation) != Some(generation) {
                return;
            }
            *slot = None;
        }

        let trigger = match kind {
            TimerKind::Debounce => {
                self.status.update(|s| s.immediate_sync_scheduled = false);
                SyncTrigger::Debounce
            }
            TimerKind::Backoff => SyncTrigger::Backoff,
        };

        match self.run_round_trip(trigger).await {
            Ok(RoundTripOutcome::Skipped(SkipReason::AlreadySyncing))
                if kind == TimerKind::Debounce =>
            {
                self.state().resync_requested = true;
            }
            Ok(_) => {}
            Err(e) => warn!(trigger = %trigger, error = %e, "Timer round-trip failed"),
        }
    }

    fn spawn_round_trip(&self, trigger: SyncTrigger) {
        let Some(engine) = self.me.upgrade() else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            warn!(trigger = %trigger, "No async runtime available, round-trip not started");
            return;
        };
        runtime.spawn(async move {
            if let Err(e) = engine.run_round_trip(trigger).await {
                warn!(trigger = %trigger, error = %e, "Background round-trip failed");
            }
        });
    }

    fn spawn_periodic(&self) -> JoinHandle<()> {
        let weak = self.me.clone();
        let cancelled = self.shutdown.clone();
        let period = self.config.periodic_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(engine) = weak.upgrade() else { break };
                if let Err(e) = engine.run_round_trip(SyncTrigger::Periodic).await {
                    warn!(error = %e, "Periodic round-trip failed");
                }
            }
        })
    }

    fn spawn_credential_watcher(&self) -> JoinHandle<()> {
        let weak = self.me.clone();
        let cancelled = self.shutdown.clone();
        let mut credentials = self.credentials.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    changed = credentials.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let present = credentials.borrow_and_update().is_some();
                let Some(engine) = weak.upgrade() else { break };
                if !present {
                    engine.on_credential_lost();
                }
            }
        })
    }

    /// Retry timers are pointless without a credential; the queue itself
    /// stays until the next sign-in.
    fn on_credential_lost(&self) {
        {
            let mut state = self.state();
            state.clear_timers();
            state.consecutive_failures = 0;
        }
        self.status.update(|s| s.immediate_sync_scheduled = false);
        info!("Credential gone, sync timers cleared");
    }

    fn emit(&self, event: SyncEvent) {
        self.event_bus.emit(CoreEvent::Sync(event)).ok();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Debounce,
    Backoff,
}

impl MutationListener for SyncEngine {
    fn on_local_mutation(&self) {
        self.notify_local_mutation();
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.clear_timers();
        for task in state.background.drain(..) {
            task.abort();
        }
    }
}
