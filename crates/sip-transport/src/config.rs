//! Transport layer configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::stream::tls::TlsConfig;

/// Settings shared by all transports owned by one stack instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Capacity of each transport event channel
    pub channel_capacity: usize,
    /// Pooled connections per stream transport before LRU eviction
    pub max_connections: usize,
    /// Pooled connections unused for this long are closed by the idle sweep
    pub idle_timeout: Duration,
    /// Lifetime of a NAT binding without refresh
    pub binding_refresh: Duration,
    /// Interval for keep-alive datagrams towards NAT-ed peers; `None` disables them
    pub keepalive_interval: Option<Duration>,
    /// Certificates for TLS; required by `StreamTransport::bind_tls`
    pub tls: Option<TlsConfig>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 100,
            max_connections: 100,
            idle_timeout: Duration::from_secs(300),
            binding_refresh: Duration::from_secs(3600),
            keepalive_interval: None,
            tls: None,
        }
    }
}

impl TransportConfig {
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_binding_refresh(mut self, refresh: Duration) -> Self {
        self.binding_refresh = refresh;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be greater than zero".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be greater than zero".to_string());
        }
        if self.idle_timeout.is_zero() {
            return Err("idle_timeout must be greater than zero".to_string());
        }
        if self.binding_refresh.is_zero() {
            return Err("binding_refresh must be greater than zero".to_string());
        }
        if matches!(self.keepalive_interval, Some(interval) if interval.is_zero()) {
            return Err("keepalive_interval must be greater than zero when set".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = TransportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.binding_refresh, Duration::from_secs(3600));
        assert!(config.keepalive_interval.is_none());
    }

    #[test]
    fn test_invalid_values() {
        let config = TransportConfig::default().with_max_connections(0);
        assert!(config.validate().is_err());

        let config = TransportConfig::default().with_keepalive_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = TransportConfig::default().with_keepalive_interval(Duration::from_secs(20));
        let json = serde_json::to_string(&config).unwrap();
        let parsed: TransportConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.keepalive_interval, Some(Duration::from_secs(20)));
    }
}
