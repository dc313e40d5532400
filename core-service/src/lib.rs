//! Core service façade and bootstrap helpers.
//!
//! This crate wires the host-provided bridges (HTTP, secure storage,
//! network monitor) and the workshop database into one [`WorkshopCore`]:
//! the local unit store, the signed-in session, and the sync engine that
//! keeps them in step with the server. Desktop apps typically enable the
//! `desktop-shims` feature so missing bridges fall back to the
//! `bridge-desktop` adapters.
//!
//! Logging is left to the host; call
//! [`core_runtime::logging::init_logging`] before bootstrapping.

pub mod error;

pub use error::{CoreError, Result};

use bridge_traits::network::NetworkMonitor;
use bridge_traits::storage::SecureStore;
use bridge_traits::time::{Clock, SystemClock};
use core_auth::{Credential, CredentialProvider, CredentialStore, SessionManager};
use core_library::db::{create_pool, DatabaseConfig};
use core_library::{LocalStore, SqliteLocalStore, UnitService};
use core_runtime::config::CoreConfig;
use core_runtime::events::EventBus;
use core_sync::{LoginSync, RemoteClient, SyncConfig, SyncDeps, SyncEngine};
use provider_workshop_api::WorkshopApiClient;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Everything [`WorkshopCore`] is assembled from.
pub struct CoreDependencies {
    pub store: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteClient>,
    pub secure_store: Arc<dyn SecureStore>,
    pub clock: Arc<dyn Clock>,
    /// Without a monitor the device is assumed online.
    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,
    pub event_bus: EventBus,
}

impl CoreDependencies {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteClient>,
        secure_store: Arc<dyn SecureStore>,
    ) -> Self {
        Self {
            store,
            remote,
            secure_store,
            clock: Arc::new(SystemClock),
            network_monitor: None,
            event_bus: EventBus::new(DEFAULT_EVENT_CAPACITY),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }
}

/// Primary façade exposed to host applications.
pub struct WorkshopCore {
    units: UnitService,
    engine: Arc<SyncEngine>,
    session: Arc<SessionManager>,
    event_bus: EventBus,
    shutdown: CancellationToken,
    network_watcher: Mutex<Option<JoinHandle<()>>>,
}

impl WorkshopCore {
    /// Open the database, restore the session and start syncing.
    ///
    /// ```ignore
    /// let config = CoreConfig::builder()
    ///     .api_base_url("https://workshop.example.com/api")
    ///     .database_path(data_dir.join("workshop.db"))
    ///     .build()?;
    /// let core = WorkshopCore::bootstrap(config, SyncConfig::default()).await?;
    /// ```
    #[instrument(skip_all, fields(database = %config.database_path.display()))]
    pub async fn bootstrap(config: CoreConfig, sync_config: SyncConfig) -> Result<Self> {
        let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
        let store: Arc<dyn LocalStore> = Arc::new(SqliteLocalStore::new(pool));

        let remote = WorkshopApiClient::new(config.http_client.clone(), &config.api_base_url)
            .with_timeout(config.request_timeout);

        let sync_config = SyncConfig {
            background_sync: config.features.enable_background_sync,
            ..sync_config
        };

        let mut deps = CoreDependencies::new(store, Arc::new(remote), config.secure_store.clone());
        if config.features.enable_network_awareness {
            deps.network_monitor = config.network_monitor.clone();
        }

        Self::with_dependencies(deps, sync_config).await
    }

    /// Assemble the core from explicit collaborators.
    pub async fn with_dependencies(deps: CoreDependencies, sync_config: SyncConfig) -> Result<Self> {
        let session = Arc::new(SessionManager::new(
            CredentialStore::new(deps.secure_store),
            deps.clock.clone(),
            deps.event_bus.clone(),
        ));
        let restored = session.restore().await?;

        let engine = SyncEngine::new(
            SyncDeps {
                store: deps.store.clone(),
                remote: deps.remote,
                credentials: session.clone(),
                clock: deps.clock.clone(),
                event_bus: deps.event_bus.clone(),
            },
            sync_config,
        )?;

        let units = UnitService::new(deps.store, deps.clock).with_listener(engine.clone());
        units.set_owner(restored.map(|c| c.identity_id.to_string()));

        engine.start().await?;

        let core = Self {
            units,
            engine,
            session,
            event_bus: deps.event_bus,
            shutdown: CancellationToken::new(),
            network_watcher: Mutex::new(None),
        };
        core.watch_network(deps.network_monitor).await;

        info!(
            signed_in = core.session.current().is_some(),
            "Workshop core ready"
        );
        Ok(core)
    }

    async fn watch_network(&self, monitor: Option<Arc<dyn NetworkMonitor>>) {
        let Some(monitor) = monitor else {
            self.engine.set_online(true);
            return;
        };

        match monitor.get_network_info().await {
            Ok(info) => self.engine.set_online(info.is_online()),
            Err(e) => {
                warn!(error = %e, "Network status unavailable, assuming online");
                self.engine.set_online(true);
            }
        }

        let mut changes = match monitor.subscribe_changes().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Network change notifications unavailable");
                return;
            }
        };

        let engine = Arc::downgrade(&self.engine);
        let cancelled = self.shutdown.clone();
        let task = tokio::spawn(async move {
            loop {
                let info = tokio::select! {
                    _ = cancelled.cancelled() => break,
                    next = changes.next() => match next {
                        Some(info) => info,
                        None => break,
                    },
                };
                let Some(engine) = engine.upgrade() else { break };
                engine.set_online(info.is_online());
            }
        });

        *self
            .network_watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Unit reads and edits. Every edit is queued for sync.
    pub fn units(&self) -> &UnitService {
        &self.units
    }

    pub fn sync(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn events(&self) -> &EventBus {
        &self.event_bus
    }

    /// Install the credential from the host's login flow and start the
    /// post-login sync.
    #[instrument(skip_all, fields(identity_id = %credential.identity_id))]
    pub async fn sign_in(&self, credential: Credential) -> Result<LoginSync> {
        let owner = credential.identity_id.to_string();
        self.session.sign_in(credential).await?;
        self.units.set_owner(Some(owner));
        Ok(self.engine.on_login_completed())
    }

    /// Clear the credential. Queued mutations stay for the next sign-in.
    pub async fn sign_out(&self) -> Result<()> {
        self.session.sign_out().await?;
        self.units.set_owner(None);
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(task) = self
            .network_watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.engine.shutdown();
        info!("Workshop core stopped");
    }
}

impl Drop for WorkshopCore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
