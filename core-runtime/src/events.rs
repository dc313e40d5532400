//! # Event Bus System
//!
//! Typed, broadcast-based events shared between the workshop core modules.
//!
//! ## Overview
//!
//! - **Event Types**: one enum per domain, wrapped by [`CoreEvent`]
//! - **EventBus**: a cloneable handle over a `tokio::sync::broadcast` channel
//! - **EventStream**: a receiver wrapper with optional filtering
//!
//! ```text
//! ┌─────────────┐     emit      ┌───────────┐
//! │ Auth Module ├──────────────>│           │
//! └─────────────┘               │ EventBus  │     subscribe    ┌────────────┐
//! ┌─────────────┐     emit      │ (broadcast├─────────────────>│ Subscriber │
//! │ Sync Engine ├──────────────>│  channel) │                  └────────────┘
//! └─────────────┘               │           │
//! ┌─────────────┐     emit      │           │
//! │Network Watch├──────────────>│           │
//! └─────────────┘               └───────────┘
//! ```
//!
//! The bus is an observability channel. The sync engine's status snapshots
//! travel through its own ordered subscriber list, not through this bus, so a
//! lagging event subscriber can never hide a status change from the UI.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Auth(AuthEvent::SignedIn {
//!         identity_id: "user-123".to_string(),
//!     }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.description(), "User signed in");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; keep receiving.
//! - **`RecvError::Closed`**: every sender is gone; treat as shutdown.
//!
//! `emit` fails only when nobody is subscribed, which callers ignore with `.ok()`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Auth(AuthEvent),
    Sync(SyncEvent),
    Network(NetworkEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Network(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::AuthError { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::RecordsExhausted { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::RoundTripFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::SessionExpired { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::SignedIn { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::RoundTripCompleted { .. }) => EventSeverity::Info,
            CoreEvent::Network(_) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Credential lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// A credential obtained by the host's login flow was installed.
    SignedIn { identity_id: String },
    /// A persisted credential was loaded at launch.
    SessionRestored { identity_id: String },
    /// The credential was cleared by the user.
    SignedOut { identity_id: String },
    /// The credential passed its expiry and is no longer offered to the engine.
    SessionExpired { identity_id: String },
    /// Persisting or loading the credential failed.
    AuthError {
        message: String,
        /// Whether the error is recoverable (e.g., retry possible).
        recoverable: bool,
    },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::SignedIn { .. } => "User signed in",
            AuthEvent::SessionRestored { .. } => "Session restored",
            AuthEvent::SignedOut { .. } => "User signed out",
            AuthEvent::SessionExpired { .. } => "Session expired",
            AuthEvent::AuthError { .. } => "Authentication error",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Round-trip lifecycle events emitted by the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A push-then-pull round-trip began.
    RoundTripStarted {
        /// What started it: `debounce`, `periodic`, `backoff`, `online`, `requested`, `manual` or `login`.
        trigger: String,
        queued_records: u64,
    },
    /// The round-trip finished without a single failed record.
    RoundTripCompleted {
        acknowledged: u64,
        pulled_inserted: u64,
        pulled_overwritten: u64,
        duration_ms: u64,
    },
    /// At least one record failed, or the round-trip errored out.
    RoundTripFailed {
        failed_records: u64,
        message: Option<String>,
        consecutive_failures: u32,
        /// Seconds until the backoff timer fires.
        retry_in_secs: u64,
    },
    /// Records hit the retry ceiling and were dropped from the queue.
    ///
    /// Their mutations are lost locally; the entities must be edited again to
    /// be re-queued.
    RecordsExhausted {
        record_ids: Vec<String>,
        entity_ids: Vec<String>,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::RoundTripStarted { .. } => "Sync started",
            SyncEvent::RoundTripCompleted { .. } => "Sync completed",
            SyncEvent::RoundTripFailed { .. } => "Sync failed, retry scheduled",
            SyncEvent::RecordsExhausted { .. } => "Pending changes dropped after repeated failures",
        }
    }
}

// ============================================================================
// Network Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum NetworkEvent {
    Online,
    Offline,
}

impl NetworkEvent {
    fn description(&self) -> &str {
        match self {
            NetworkEvent::Online => "Device is online",
            NetworkEvent::Offline => "Device is offline",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event broadcasting hub.
///
/// Cloning is cheap; every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the number of subscribers reached, or an error when there are
    /// none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver wrapper that skips events rejected by a predicate.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive. `None` means nothing matching is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
