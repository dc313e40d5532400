//! Network Monitoring Abstraction
//!
//! Connectivity information used to gate synchronization.

use async_trait::async_trait;

use crate::error::Result;

/// Network connection type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    Cellular,
    WiFi,
    Ethernet,
    Other,
}

/// Network connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Connected,
    Disconnected,
    /// The platform could not determine reachability.
    Indeterminate,
}

/// Network information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    pub network_type: Option<NetworkType>,
    /// Whether the connection is metered (has data limits/costs)
    pub is_metered: bool,
}

impl NetworkInfo {
    pub fn connected(network_type: NetworkType) -> Self {
        Self {
            status: NetworkStatus::Connected,
            network_type: Some(network_type),
            is_metered: matches!(network_type, NetworkType::Cellular),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            status: NetworkStatus::Disconnected,
            network_type: None,
            is_metered: false,
        }
    }

    /// Only a positive `Connected` report counts as online; an indeterminate
    /// status is treated as offline so no requests are attempted blindly.
    pub fn is_online(&self) -> bool {
        self.status == NetworkStatus::Connected
    }
}

/// Network monitor trait
///
/// Lets the core defer synchronization while offline and start a round-trip
/// as soon as connectivity returns.
///
/// # Platform Support
///
/// - **Desktop**: TCP reachability probe
/// - **iOS**: Network framework, Reachability
/// - **Android**: ConnectivityManager
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Get current network information
    async fn get_network_info(&self) -> Result<NetworkInfo>;

    /// Check if currently connected to any network
    async fn is_connected(&self) -> bool {
        self.get_network_info()
            .await
            .map(|info| info.is_online())
            .unwrap_or(false)
    }

    /// Subscribe to network status changes
    ///
    /// Implementations emit an update whenever the status changes; repeated
    /// identical readings are not re-emitted.
    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>>;
}

/// Stream of network status changes
#[async_trait]
pub trait NetworkChangeStream: Send {
    /// Get the next network info update
    ///
    /// Returns `None` when the stream is closed.
    async fn next(&mut self) -> Option<NetworkInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedMonitor(NetworkInfo);

    #[async_trait]
    impl NetworkMonitor for FixedMonitor {
        async fn get_network_info(&self) -> Result<NetworkInfo> {
            Ok(self.0.clone())
        }

        async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
            Err(crate::BridgeError::NotAvailable("no change stream".into()))
        }
    }

    #[test]
    fn test_network_info_constructors() {
        let wifi = NetworkInfo::connected(NetworkType::WiFi);
        assert!(wifi.is_online());
        assert!(!wifi.is_metered);

        let cellular = NetworkInfo::connected(NetworkType::Cellular);
        assert!(cellular.is_metered);

        assert!(!NetworkInfo::disconnected().is_online());
    }

    #[tokio::test]
    async fn test_indeterminate_is_not_connected() {
        let monitor = FixedMonitor(NetworkInfo {
            status: NetworkStatus::Indeterminate,
            network_type: None,
            is_metered: false,
        });

        assert!(!monitor.is_connected().await);
    }
}
