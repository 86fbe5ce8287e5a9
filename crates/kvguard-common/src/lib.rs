//! kvguard Common - Shared error types and defaults
//!
//! This crate provides the foundational types used across all kvguard components:
//! - Error taxonomy and error codes
//! - Default timings for locks and filters
//! - Store connection defaults

pub mod error;

// Re-exports for convenience
pub use error::{ErrorCode, KvGuardError, Result};

/// Literal hash tag wrapped around every lock name so all lock keys share one slot
pub const LOCK_HASH_TAG: &str = "redlock";

/// Default lock lifetime in milliseconds
pub const DEFAULT_LOCK_TTL_MS: u64 = 5_000;

/// Default time to wait for replica acknowledgment in milliseconds
pub const DEFAULT_REPLICATION_WAIT_MS: u64 = 500;

/// Default retry budget used by `try_lock_with_retry`
pub const DEFAULT_RETRY_BUDGET_MS: u64 = 60 * 1000;

/// Hard ceiling on any retry budget (5 minutes)
pub const MAX_RETRY_BUDGET_MS: u64 = 5 * 60 * 1000;

/// Sleep between two acquisition attempts while retrying
pub const RETRY_POLL_INTERVAL_MS: u64 = 5;

/// Replica acknowledgments required in sharded mode never exceed this count
pub const MAX_LOCK_REPLICA_QUORUM: usize = 2;

/// Default false-positive rate for membership filters
pub const DEFAULT_FILTER_ERROR_RATE: f64 = 0.03;

/// Store connection defaults
pub const DEFAULT_STORE_PORT: u16 = 6379;
pub const DEFAULT_POOL_MAX_TOTAL: usize = 20;
pub const DEFAULT_POOL_MAX_IDLE: usize = 20;
pub const DEFAULT_POOL_MIN_IDLE: usize = 10;
pub const DEFAULT_POOL_WAIT_MS: u64 = 300;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_TOPOLOGY_REFRESH_MS: u64 = 5_000;

/// Build the backing store key for a lock name
pub fn lock_key(lock_name: &str) -> String {
    format!("{{{}}}_{}", LOCK_HASH_TAG, lock_name)
}
