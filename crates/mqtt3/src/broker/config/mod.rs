mod auth;

pub use auth::{AuthConfig, UserCredential};

use crate::encoding::VARIABLE_INT_MAX;
use crate::{MqttError, Result};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

fn default_client_channel_capacity() -> usize {
    10000
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub bind_addresses: Vec<SocketAddr>,
    pub max_clients: usize,
    /// Connection is closed after this long without any inbound packet
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Time allowed between accept and the CONNECT packet
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    pub max_packet_size: usize,
    #[serde(default = "default_client_channel_capacity")]
    pub client_channel_capacity: usize,
    #[serde(default)]
    pub authentication: AuthConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addresses: vec![SocketAddr::from((Ipv4Addr::UNSPECIFIED, 1883))],
            max_clients: 10000,
            idle_timeout: Duration::from_secs(60),
            connect_timeout: default_connect_timeout(),
            max_packet_size: VARIABLE_INT_MAX as usize,
            client_channel_capacity: default_client_channel_capacity(),
            authentication: AuthConfig::default(),
        }
    }
}

impl BrokerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the default listener list with a single address.
    #[must_use]
    pub fn with_bind_address(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.bind_addresses = vec![addr.into()];
        self
    }

    #[must_use]
    pub fn add_bind_address(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.bind_addresses.push(addr.into());
        self
    }

    #[must_use]
    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    #[must_use]
    pub fn with_client_channel_capacity(mut self, capacity: usize) -> Self {
        self.client_channel_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_authentication(mut self, authentication: AuthConfig) -> Self {
        self.authentication = authentication;
        self
    }

    /// Validates the configuration
    ///
    /// # Errors
    /// Returns an error if any limit is zero or out of range
    pub fn validate(&self) -> Result<&Self> {
        if self.bind_addresses.is_empty() {
            return Err(MqttError::Configuration(
                "at least one bind address is required".to_string(),
            ));
        }

        if self.max_clients == 0 {
            return Err(MqttError::Configuration(
                "max_clients must be greater than 0".to_string(),
            ));
        }

        if self.max_packet_size < 2 {
            return Err(MqttError::Configuration(
                "max_packet_size must be at least 2 bytes".to_string(),
            ));
        }

        if self.idle_timeout.is_zero() {
            return Err(MqttError::Configuration(
                "idle_timeout must be greater than 0".to_string(),
            ));
        }

        if self.client_channel_capacity == 0 {
            return Err(MqttError::Configuration(
                "client_channel_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(self)
    }
}
