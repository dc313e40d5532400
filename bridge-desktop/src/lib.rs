//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux):
//! - `HttpClient` using `reqwest`
//! - `NetworkMonitor` using a TCP reachability probe
//! - `SecureStore` using the `keyring` crate
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DesktopNetworkMonitor, ReqwestHttpClient};
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .api_base_url("https://api.example.com")
//!     .database_path("/tmp/workshop.db")
//!     .http_client(Arc::new(ReqwestHttpClient::default()))
//!     .network_monitor(Arc::new(
//!         DesktopNetworkMonitor::new().with_probe_addr("api.example.com:443"),
//!     ))
//!     .build()?;
//! ```

mod http;
mod network;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use http::ReqwestHttpClient;
pub use network::DesktopNetworkMonitor;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
