//! # Host Bridge Traits
//!
//! Capabilities the workshop core needs from its host but cannot provide
//! itself.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP requests against the workshop API
//! - [`NetworkMonitor`](network::NetworkMonitor) - Online/offline detection and change notifications
//!
//! ### Security
//! - [`SecureStore`](storage::SecureStore) - Credential persistence (Keychain/Keystore/Secret Service)
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | iOS      | TBD                 | 📋 Planned |
//! | Android  | TBD                 | 📋 Planned |
//!
//! Mobile hosts inject their own adapters through
//! `core_runtime::config::CoreConfigBuilder`; the core fails fast with
//! `CapabilityMissing` when a required bridge is absent.
//!
//! ## Error Handling
//!
//! Every bridge returns [`BridgeError`](error::BridgeError). Implementations
//! should map platform errors into it with actionable messages, and report
//! connectivity problems as [`BridgeError::Network`] so the sync layer can
//! tell them apart from rejected requests.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so adapters can be shared across
//! tasks behind an `Arc`.

pub mod error;
pub mod http;
pub mod network;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType};
pub use storage::SecureStore;
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
