//! Configuration loading for the kvguard binary
//!
//! Sources, lowest precedence first: `conf/kvguard.yml` (or `--config`),
//! `KVGUARD_*` environment variables, command line flags.

use std::net::SocketAddr;

use config::{Config, Environment, File};
use kvguard_common::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_FILTER_ERROR_RATE, DEFAULT_POOL_MAX_IDLE,
    DEFAULT_POOL_MAX_TOTAL, DEFAULT_POOL_MIN_IDLE, DEFAULT_POOL_WAIT_MS, DEFAULT_STORE_PORT,
    DEFAULT_TOPOLOGY_REFRESH_MS,
};
use kvguard_lock::LockSettings;
use kvguard_store::StoreConfig;

use crate::cli::GlobalArgs;

pub const DEFAULT_CONFIG_FILE: &str = "conf/kvguard";

const LOG_LEVEL: &str = "log.level";
const STORE_ADDRESS: &str = "store.address";
const STORE_PORT: &str = "store.port";
const STORE_CLUSTER: &str = "store.cluster";
const STORE_MEMORY: &str = "store.memory";
const METRICS_PROMETHEUS_ADDRESS: &str = "metrics.prometheus_address";

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn new(args: &GlobalArgs) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => File::with_name(path),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let mut builder = Config::builder().add_source(file).add_source(
            Environment::with_prefix("kvguard")
                .separator(".")
                .try_parsing(true),
        );

        if let Some(address) = &args.address {
            builder = builder.set_override(STORE_ADDRESS, address.as_str())?;
        }
        if let Some(port) = args.port {
            builder = builder.set_override(STORE_PORT, i64::from(port))?;
        }
        if args.standalone {
            builder = builder.set_override(STORE_CLUSTER, false)?;
        }
        if args.memory {
            builder = builder.set_override(STORE_MEMORY, true)?;
        }

        Ok(Configuration {
            config: builder.build()?,
        })
    }

    fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.config
            .get_int(key)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(default)
    }

    // ========================================================================
    // Logging / Metrics
    // ========================================================================

    pub fn log_level(&self) -> String {
        self.config
            .get_string(LOG_LEVEL)
            .unwrap_or("info".to_string())
    }

    pub fn prometheus_address(&self) -> anyhow::Result<Option<SocketAddr>> {
        match self.config.get_string(METRICS_PROMETHEUS_ADDRESS) {
            Ok(address) if !address.is_empty() => Ok(Some(address.parse()?)),
            _ => Ok(None),
        }
    }

    // ========================================================================
    // Store
    // ========================================================================

    /// Use the in-process store instead of Redis
    pub fn use_memory_store(&self) -> bool {
        self.config.get_bool(STORE_MEMORY).unwrap_or(false)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            address: self
                .config
                .get_string(STORE_ADDRESS)
                .unwrap_or("127.0.0.1".to_string()),
            port: u16::try_from(self.get_u64(STORE_PORT, u64::from(DEFAULT_STORE_PORT)))
                .unwrap_or(DEFAULT_STORE_PORT),
            max_total: self.get_u64("store.max_total", DEFAULT_POOL_MAX_TOTAL as u64) as usize,
            max_idle: self.get_u64("store.max_idle", DEFAULT_POOL_MAX_IDLE as u64) as usize,
            min_idle: self.get_u64("store.min_idle", DEFAULT_POOL_MIN_IDLE as u64) as usize,
            pool_wait_ms: self.get_u64("store.pool_wait_ms", DEFAULT_POOL_WAIT_MS),
            connect_timeout_ms: self.get_u64("store.connect_timeout_ms", DEFAULT_CONNECT_TIMEOUT_MS),
            cluster: self.config.get_bool(STORE_CLUSTER).unwrap_or(true),
            prepare_pool: self.config.get_bool("store.prepare_pool").unwrap_or(false),
            topology_refresh_ms: self
                .get_u64("store.topology_refresh_ms", DEFAULT_TOPOLOGY_REFRESH_MS),
        }
    }

    // ========================================================================
    // Lock / Filter
    // ========================================================================

    pub fn lock_settings(&self) -> LockSettings {
        let defaults = LockSettings::default();
        LockSettings {
            ttl_ms: self.get_u64("lock.ttl_ms", defaults.ttl_ms),
            replication_wait_ms: self
                .get_u64("lock.replication_wait_ms", defaults.replication_wait_ms),
            retry_budget_ms: self.get_u64("lock.retry_budget_ms", defaults.retry_budget_ms),
            poll_interval_ms: self.get_u64("lock.poll_interval_ms", defaults.poll_interval_ms),
        }
    }

    pub fn filter_error_rate(&self) -> f64 {
        self.config
            .get_float("filter.error_rate")
            .unwrap_or(DEFAULT_FILTER_ERROR_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> GlobalArgs {
        GlobalArgs {
            config: None,
            address: None,
            port: None,
            standalone: false,
            memory: false,
        }
    }

    #[test]
    fn test_defaults_without_file() {
        let configuration = Configuration::default();
        let store = configuration.store_config();
        assert_eq!(store.address, "127.0.0.1");
        assert_eq!(store.port, 6379);
        assert_eq!(store.max_total, 20);
        assert!(store.cluster);
        assert!(!configuration.use_memory_store());
        assert_eq!(configuration.log_level(), "info");
        assert_eq!(configuration.lock_settings().ttl_ms, 5_000);
        assert_eq!(configuration.filter_error_rate(), 0.03);
        assert_eq!(configuration.prometheus_address().unwrap(), None);
    }

    #[test]
    fn test_command_line_overrides() {
        let mut args = args();
        args.address = Some("cache.internal".to_string());
        args.port = Some(7000);
        args.standalone = true;
        args.memory = true;

        let configuration = Configuration::new(&args).unwrap();
        let store = configuration.store_config();
        assert_eq!(store.address, "cache.internal");
        assert_eq!(store.port, 7000);
        assert!(!store.cluster);
        assert!(configuration.use_memory_store());
    }

    #[test]
    fn test_out_of_range_port_falls_back_to_default() {
        let config = Config::builder()
            .set_override(STORE_PORT, 70_000_i64)
            .unwrap()
            .build()
            .unwrap();
        let configuration = Configuration { config };
        assert_eq!(configuration.store_config().port, DEFAULT_STORE_PORT);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let mut args = args();
        args.config = Some("does/not/exist".to_string());
        assert!(Configuration::new(&args).is_err());
    }
}
