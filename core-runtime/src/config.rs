//! # Core Configuration Module
//!
//! Builder-based configuration for the workshop core with fail-fast
//! validation of the host bridges.
//!
//! ## Required
//!
//! - `api_base_url` - Root URL of the workshop API (`https://…/api`)
//! - `database_path` - SQLite file holding units and the mutation queue
//! - `HttpClient` - Requests to the workshop API (desktop default: reqwest)
//! - `SecureStore` - Credential persistence (desktop default: OS keychain)
//!
//! ## Optional
//!
//! - `NetworkMonitor` - Connectivity detection; required when network awareness is on
//! - `LoggerSink` - Mirror logs into the host's logging pipeline
//!
//! With the `desktop-shims` feature the missing required bridges are filled
//! with the `bridge-desktop` adapters. Without it, a missing bridge fails with
//! [`Error::CapabilityMissing`] naming what the host has to inject.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .api_base_url("https://api.example.com")
//!     .database_path("/data/workshop.db")
//!     .http_client(Arc::new(MyHttpClient))
//!     .secure_store(Arc::new(MySecureStore))
//!     .network_monitor(Arc::new(MyNetworkMonitor))
//!     .enable_network_awareness(true)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{HttpClient, LoggerSink, NetworkMonitor, SecureStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Core configuration
///
/// Holds the bridge implementations and settings the core is bootstrapped
/// with. Build it through [`CoreConfig::builder`].
#[derive(Clone)]
pub struct CoreConfig {
    /// Root URL of the workshop API, without a trailing slash
    pub api_base_url: String,

    pub database_path: PathBuf,

    /// Per-request timeout for API calls
    pub request_timeout: Duration,

    pub http_client: Arc<dyn HttpClient>,

    pub secure_store: Arc<dyn SecureStore>,

    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,

    pub logger_sink: Option<Arc<dyn LoggerSink>>,

    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("api_base_url", &self.api_base_url)
            .field("database_path", &self.database_path)
            .field("request_timeout", &self.request_timeout)
            .field("http_client", &"HttpClient { ... }")
            .field("secure_store", &"SecureStore { ... }")
            .field(
                "network_monitor",
                &self
                    .network_monitor
                    .as_ref()
                    .map(|_| "NetworkMonitor { ... }"),
            )
            .field(
                "logger_sink",
                &self.logger_sink.as_ref().map(|_| "LoggerSink { ... }"),
            )
            .field("features", &self.features)
            .finish()
    }
}

/// Feature toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Run the periodic backstop sync timer
    pub enable_background_sync: bool,

    /// Follow `NetworkMonitor` change notifications; without it the device is
    /// assumed online
    pub enable_network_awareness: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_background_sync: true,
            enable_network_awareness: false,
        }
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validate the assembled configuration
    ///
    /// # Errors
    ///
    /// - empty database path
    /// - API base URL that is not `http(s)://`
    /// - zero request timeout
    /// - network awareness enabled without a `NetworkMonitor`
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if !(self.api_base_url.starts_with("https://") || self.api_base_url.starts_with("http://"))
        {
            return Err(Error::Config(format!(
                "API base URL must start with http:// or https://, got '{}'",
                self.api_base_url
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "Request timeout must be greater than zero".to_string(),
            ));
        }

        if self.features.enable_network_awareness && self.network_monitor.is_none() {
            return Err(Error::Config(
                "Network awareness enabled but no NetworkMonitor provided. \
                 Disable the feature or inject a NetworkMonitor implementation."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn secure_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SecureStore".to_string(),
        message: "SecureStore implementation is required for credential persistence. \
                 Desktop: enable the 'desktop-shims' feature to use the default KeyringSecureStore. \
                 Mobile: inject platform-native secure storage (Keychain/Keystore)."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required to reach the workshop API. \
                 Desktop: enable the 'desktop-shims' feature to use the default ReqwestHttpClient. \
                 Mobile: inject the platform HTTP stack (URLSession/OkHttp)."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    use bridge_desktop::KeyringSecureStore;

    let store: Arc<dyn SecureStore> = Arc::new(KeyringSecureStore::new());
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(secure_store_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::with_timeout(timeout).map_err(|e| Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: format!("Default ReqwestHttpClient could not be created: {}", e),
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

/// Builder for [`CoreConfig`]
#[derive(Default)]
pub struct CoreConfigBuilder {
    api_base_url: Option<String>,
    database_path: Option<PathBuf>,
    request_timeout: Option<Duration>,
    http_client: Option<Arc<dyn HttpClient>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    logger_sink: Option<Arc<dyn LoggerSink>>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Trailing slashes are trimmed so endpoint paths can be appended verbatim.
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn enable_background_sync(mut self, enabled: bool) -> Self {
        self.features.enable_background_sync = enabled;
        self
    }

    pub fn enable_network_awareness(mut self, enabled: bool) -> Self {
        self.features.enable_network_awareness = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for missing or invalid settings and
    /// [`Error::CapabilityMissing`] when a required bridge is absent and no
    /// platform default is compiled in.
    pub fn build(self) -> Result<CoreConfig> {
        let api_base_url = self.api_base_url.ok_or_else(|| {
            Error::Config("API base URL is required. Use .api_base_url() to set it.".to_string())
        })?;

        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(request_timeout)?,
        };

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let config = CoreConfig {
            api_base_url,
            database_path,
            request_timeout,
            http_client,
            secure_store,
            network_monitor: self.network_monitor,
            logger_sink: self.logger_sink,
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::http::{HttpRequest, HttpResponse};
    use bridge_traits::network::{NetworkChangeStream, NetworkInfo};
    use bridge_traits::BridgeError;

    struct MockSecureStore;

    #[async_trait]
    impl SecureStore for MockSecureStore {
        async fn set_secret(&self, _key: &str, _value: &[u8]) -> bridge_traits::error::Result<()> {
            Ok(())
        }

        async fn get_secret(&self, _key: &str) -> bridge_traits::error::Result<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn delete_secret(&self, _key: &str) -> bridge_traits::error::Result<()> {
            Ok(())
        }
    }

    struct MockHttpClient;

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn execute(&self, _request: HttpRequest) -> bridge_traits::error::Result<HttpResponse> {
            Err(BridgeError::Network("offline".to_string()))
        }
    }

    struct MockNetworkMonitor;

    #[async_trait]
    impl NetworkMonitor for MockNetworkMonitor {
        async fn get_network_info(&self) -> bridge_traits::error::Result<NetworkInfo> {
            Ok(NetworkInfo::disconnected())
        }

        async fn subscribe_changes(
            &self,
        ) -> bridge_traits::error::Result<Box<dyn NetworkChangeStream>> {
            Err(BridgeError::NotAvailable("not in tests".to_string()))
        }
    }

    fn complete_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .api_base_url("https://api.example.com/")
            .database_path("/data/workshop.db")
            .http_client(Arc::new(MockHttpClient))
            .secure_store(Arc::new(MockSecureStore))
    }

    #[test]
    fn test_builder_with_all_required_fields() {
        let config = complete_builder().build().unwrap();

        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.database_path, PathBuf::from("/data/workshop.db"));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert!(config.features.enable_background_sync);
        assert!(!config.features.enable_network_awareness);
    }

    #[test]
    fn test_builder_requires_api_base_url() {
        let err = CoreConfig::builder()
            .database_path("/data/workshop.db")
            .http_client(Arc::new(MockHttpClient))
            .secure_store(Arc::new(MockSecureStore))
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("API base URL is required"));
    }

    #[test]
    fn test_builder_requires_database_path() {
        let err = CoreConfig::builder()
            .api_base_url("https://api.example.com")
            .http_client(Arc::new(MockHttpClient))
            .secure_store(Arc::new(MockSecureStore))
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("Database path is required"));
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let err = complete_builder()
            .api_base_url("ftp://api.example.com")
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = complete_builder()
            .request_timeout(Duration::ZERO)
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_network_awareness_requires_monitor() {
        let err = complete_builder()
            .enable_network_awareness(true)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("NetworkMonitor"));

        let config = complete_builder()
            .enable_network_awareness(true)
            .network_monitor(Arc::new(MockNetworkMonitor))
            .build()
            .unwrap();
        assert!(config.network_monitor.is_some());
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_bridges_are_capability_errors() {
        let err = CoreConfig::builder()
            .api_base_url("https://api.example.com")
            .database_path("/data/workshop.db")
            .secure_store(Arc::new(MockSecureStore))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::CapabilityMissing { ref capability, .. } if capability == "HttpClient"));

        let err = CoreConfig::builder()
            .api_base_url("https://api.example.com")
            .database_path("/data/workshop.db")
            .http_client(Arc::new(MockHttpClient))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("credential persistence"));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_desktop_shims_fill_missing_bridges() {
        let config = CoreConfig::builder()
            .api_base_url("https://api.example.com")
            .database_path("/data/workshop.db")
            .build()
            .unwrap();

        assert!(format!("{:?}", config).contains("HttpClient { ... }"));
    }

    #[test]
    fn test_debug_output_hides_bridges() {
        let config = complete_builder().build().unwrap();
        let debug = format!("{:?}", config);

        assert!(debug.contains("SecureStore { ... }"));
        assert!(debug.contains("api.example.com"));
    }
}
