// Sharded Redis cluster store
// Keeps a slot map built from CLUSTER SLOTS and one pool per primary

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::Pool;
use parking_lot::RwLock;
use redis::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{StoreConfig, node_url};
use crate::error::{StoreError, StoreResult};
use crate::slot::key_slot;
use crate::traits::{Deployment, KeyValueStore, NodeConnection, NodeId, Topology};

use super::connection::{RedisNodeConnection, create_pool, prepare_pool};

/// Contiguous slot range served by one primary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
    pub node: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NodeInfo {
    url: String,
    replicas: usize,
}

/// Snapshot of the cluster layout
#[derive(Debug, Clone, Default)]
pub struct ClusterView {
    ranges: Vec<SlotRange>,
    nodes: HashMap<NodeId, NodeInfo>,
}

impl ClusterView {
    /// Build a view from a raw `CLUSTER SLOTS` reply
    ///
    /// Entries with an empty host belong to the node that answered, so they
    /// fall back to `seed_host`.
    pub fn from_slots_reply(reply: &Value, seed_host: &str) -> StoreResult<Self> {
        let entries: Vec<Vec<Value>> = redis::from_redis_value(reply)?;
        let mut view = Self::default();

        for entry in entries {
            if entry.len() < 3 {
                continue;
            }
            let start: u16 = redis::from_redis_value(&entry[0])?;
            let end: u16 = redis::from_redis_value(&entry[1])?;
            let primary: Vec<Value> = redis::from_redis_value(&entry[2])?;
            if primary.len() < 2 {
                return Err(StoreError::Topology(format!(
                    "malformed primary for slots {}-{}",
                    start, end
                )));
            }
            let mut host: String = redis::from_redis_value(&primary[0])?;
            let port: u16 = redis::from_redis_value(&primary[1])?;
            if host.is_empty() {
                host = seed_host.to_string();
            }

            let node = NodeId::new(format!("{}:{}", host, port));
            view.nodes.insert(
                node.clone(),
                NodeInfo {
                    url: node_url(&host, port),
                    replicas: entry.len() - 3,
                },
            );
            view.ranges.push(SlotRange { start, end, node });
        }

        if view.ranges.is_empty() {
            return Err(StoreError::Topology("cluster reported no slots".to_string()));
        }
        view.ranges.sort_by_key(|range| range.start);
        Ok(view)
    }

    pub fn node_for_slot(&self, slot: u16) -> Option<&NodeId> {
        let index = self.ranges.partition_point(|range| range.end < slot);
        self.ranges
            .get(index)
            .filter(|range| range.start <= slot)
            .map(|range| &range.node)
    }

    pub fn primaries(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn ranges(&self) -> &[SlotRange] {
        &self.ranges
    }
}

/// Live cluster topology refreshed from a seed node
pub struct ClusterTopology {
    view: RwLock<ClusterView>,
    seed: Pool,
    seed_host: String,
}

impl ClusterTopology {
    /// Query `CLUSTER SLOTS` and swap in the new view
    pub async fn refresh(&self) -> StoreResult<ClusterView> {
        let mut conn = self.seed.get().await?;
        let reply: Value = redis::cmd("CLUSTER")
            .arg("SLOTS")
            .query_async(&mut conn)
            .await?;
        let view = ClusterView::from_slots_reply(&reply, &self.seed_host)?;
        *self.view.write() = view.clone();
        Ok(view)
    }

    fn node_url(&self, node: &NodeId) -> Option<String> {
        self.view.read().nodes.get(node).map(|info| info.url.clone())
    }
}

#[async_trait]
impl Topology for ClusterTopology {
    async fn node_owning(&self, key: &str) -> StoreResult<NodeId> {
        let slot = key_slot(key);
        self.view
            .read()
            .node_for_slot(slot)
            .cloned()
            .ok_or_else(|| StoreError::Topology(format!("no node owns slot {}", slot)))
    }

    async fn replica_count_for(&self, node: &NodeId) -> StoreResult<usize> {
        self.view
            .read()
            .nodes
            .get(node)
            .map(|info| info.replicas)
            .ok_or_else(|| StoreError::Topology(format!("unknown node {}", node)))
    }
}

/// Pooled access to a sharded Redis cluster
pub struct RedisClusterStore {
    config: StoreConfig,
    topology: Arc<ClusterTopology>,
    pools: DashMap<NodeId, Pool>,
    closing: AtomicBool,
}

impl RedisClusterStore {
    /// Discover the cluster through the configured seed node
    pub async fn open(config: &StoreConfig) -> StoreResult<Self> {
        let seed = create_pool(config, &config.url())?;
        let topology = Arc::new(ClusterTopology {
            view: RwLock::new(ClusterView::default()),
            seed,
            seed_host: config.address.clone(),
        });
        let view = topology.refresh().await?;

        let store = Self {
            config: config.clone(),
            topology,
            pools: DashMap::new(),
            closing: AtomicBool::new(false),
        };

        if config.prepare_pool {
            for node in view.primaries() {
                let pool = store.pool_for(node)?;
                prepare_pool(&pool, config.min_idle).await;
            }
        }

        info!(
            primaries = view.nodes.len(),
            ranges = view.ranges.len(),
            "Redis cluster store initialized"
        );
        Ok(store)
    }

    /// Refresh the slot map every `topology_refresh_ms` until the store closes
    pub fn spawn_topology_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let period = store.config.topology_refresh_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(100)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if store.is_closing() {
                    break;
                }
                match store.topology.refresh().await {
                    Ok(view) => {
                        // Drop pools of primaries that left the cluster
                        store.pools.retain(|node, _| view.nodes.contains_key(node));
                        debug!(primaries = view.nodes.len(), "Cluster topology refreshed");
                    }
                    Err(e) => warn!(error = %e, "Cluster topology refresh failed"),
                }
            }
        })
    }

    fn pool_for(&self, node: &NodeId) -> StoreResult<Pool> {
        if let Some(pool) = self.pools.get(node) {
            return Ok(pool.clone());
        }
        let url = self
            .topology
            .node_url(node)
            .ok_or_else(|| StoreError::Topology(format!("unknown node {}", node)))?;
        let pool = self
            .pools
            .entry(node.clone())
            .or_try_insert_with(|| create_pool(&self.config, &url))?;
        Ok(pool.clone())
    }
}

#[async_trait]
impl KeyValueStore for RedisClusterStore {
    fn deployment(&self) -> Deployment {
        Deployment::Sharded
    }

    fn topology(&self) -> &dyn Topology {
        self.topology.as_ref()
    }

    async fn connect(&self, node: &NodeId) -> StoreResult<Box<dyn NodeConnection>> {
        if self.is_closing() {
            return Err(StoreError::Closed);
        }
        let pool = self.pool_for(node)?;
        Ok(Box::new(RedisNodeConnection::borrow(node, &pool).await?))
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        for pool in self.pools.iter() {
            pool.close();
        }
        self.topology.seed.close();
        info!("Redis cluster store closed");
    }
}
