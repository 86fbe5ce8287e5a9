// Store configuration
// Connection and pool settings consumed by the Redis-backed stores

use std::time::Duration;

use kvguard_common::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_POOL_MAX_IDLE, DEFAULT_POOL_MAX_TOTAL,
    DEFAULT_POOL_MIN_IDLE, DEFAULT_POOL_WAIT_MS, DEFAULT_STORE_PORT, DEFAULT_TOPOLOGY_REFRESH_MS,
};
use serde::{Deserialize, Serialize};

/// Configuration for connecting to the store
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Host name or IP of the store (a seed node when clustered)
    pub address: String,

    pub port: u16,

    /// Maximum number of pooled connections per node (default: 20)
    pub max_total: usize,

    /// Accepted for compatibility; deadpool keeps up to `max_total` idle connections
    pub max_idle: usize,

    /// Connections opened up front when `prepare_pool` is set (default: 10)
    pub min_idle: usize,

    /// How long a caller waits for a free connection before failing (default: 300ms)
    pub pool_wait_ms: u64,

    /// Timeout for establishing a new connection (default: 2000ms)
    pub connect_timeout_ms: u64,

    /// Use sharded cluster mode (default: true)
    pub cluster: bool,

    /// Open `min_idle` connections at startup
    pub prepare_pool: bool,

    /// Period of the background cluster topology refresh (default: 5000ms)
    pub topology_refresh_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: DEFAULT_STORE_PORT,
            max_total: DEFAULT_POOL_MAX_TOTAL,
            max_idle: DEFAULT_POOL_MAX_IDLE,
            min_idle: DEFAULT_POOL_MIN_IDLE,
            pool_wait_ms: DEFAULT_POOL_WAIT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            cluster: true,
            prepare_pool: false,
            topology_refresh_ms: DEFAULT_TOPOLOGY_REFRESH_MS,
        }
    }
}

impl StoreConfig {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            ..Default::default()
        }
    }

    /// Connection URL for the configured address
    ///
    /// An address that already carries a scheme (`redis://` or `rediss://`)
    /// is used as-is.
    pub fn url(&self) -> String {
        if self.address.contains("://") {
            self.address.clone()
        } else {
            node_url(&self.address, self.port)
        }
    }

    pub fn pool_wait(&self) -> Duration {
        Duration::from_millis(self.pool_wait_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn topology_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.topology_refresh_ms)
    }

    /// Build deadpool settings for one node's pool
    pub(crate) fn pool_config(&self) -> deadpool_redis::PoolConfig {
        let mut pool = deadpool_redis::PoolConfig::new(self.max_total.max(1));
        pool.timeouts.wait = Some(self.pool_wait());
        pool.timeouts.create = Some(self.connect_timeout());
        pool.timeouts.recycle = Some(self.connect_timeout());
        pool
    }
}

pub(crate) fn node_url(host: &str, port: u16) -> String {
    format!("redis://{}:{}", host, port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.port, 6379);
        assert_eq!(config.max_total, 20);
        assert_eq!(config.min_idle, 10);
        assert_eq!(config.pool_wait(), Duration::from_millis(300));
        assert!(config.cluster);
        assert!(!config.prepare_pool);
    }

    #[test]
    fn test_url() {
        let config = StoreConfig::new("cache.internal", 6380);
        assert_eq!(config.url(), "redis://cache.internal:6380");

        let config = StoreConfig::new("rediss://secure.internal:6379", 6379);
        assert_eq!(config.url(), "rediss://secure.internal:6379");
    }

    #[test]
    fn test_pool_config() {
        let config = StoreConfig {
            max_total: 8,
            pool_wait_ms: 50,
            ..Default::default()
        };
        let pool = config.pool_config();
        assert_eq!(pool.max_size, 8);
        assert_eq!(pool.timeouts.wait, Some(Duration::from_millis(50)));
    }
}
