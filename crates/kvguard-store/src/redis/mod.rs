//! Redis backends
//!
//! - `RedisStore`: a single primary, with or without replicas
//! - `RedisClusterStore`: a sharded cluster routed by key slot

mod cluster;
mod connection;
mod scripts;
mod standalone;

use std::sync::Arc;

pub use cluster::{ClusterTopology, ClusterView, RedisClusterStore, SlotRange};
pub use connection::RedisNodeConnection;
pub use standalone::RedisStore;

use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::traits::KeyValueStore;

/// Open the store described by `config`
///
/// Cluster mode also starts the periodic topology refresh.
pub async fn open_store(config: &StoreConfig) -> StoreResult<Arc<dyn KeyValueStore>> {
    if config.cluster {
        let store = Arc::new(RedisClusterStore::open(config).await?);
        store.spawn_topology_refresh();
        Ok(store)
    } else {
        Ok(Arc::new(RedisStore::open(config).await?))
    }
}
