//! kvguard Lock - distributed mutual exclusion over a key-value store
//!
//! Locks are plain store keys named `{redlock}_<name>` holding a random owner
//! token with a millisecond ttl:
//! - single node and primary-replica: one conditional write on the primary
//! - sharded: conditional write on the owning primary, then a bounded wait for
//!   up to two replica acknowledgments, rolled back if the wait ate the ttl
//!
//! Ownership is tracked per calling context in an explicit `LockRegistry`.

pub mod manager;
pub mod metrics;
pub mod model;

pub use manager::LockManager;
pub use model::{ContextId, LockRecord, LockRegistry, LockSettings, mint_owner_token};
