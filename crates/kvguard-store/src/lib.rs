//! kvguard Store - key-value store contract and backends
//!
//! This crate provides:
//! - The store contract used by locks and filters (`traits`)
//! - Key slot hashing shared by every sharded backend (`slot`)
//! - An in-memory store with fault injection (`memory`)
//! - Redis single-node and cluster backends (`redis`)

pub mod config;
pub mod error;
pub mod memory;
pub mod redis;
pub mod slot;
pub mod traits;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use self::redis::{RedisClusterStore, RedisStore, open_store};
pub use slot::{SLOT_COUNT, key_slot};
pub use traits::{
    ConditionalOps, Deployment, KeyValueStore, NodeConnection, NodeId, SingleNodeTopology,
    Topology,
};
