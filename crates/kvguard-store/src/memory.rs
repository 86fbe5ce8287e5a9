// In-memory store
// TTL-aware key-value store with simulated shards, replicas and faults

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::slot::key_slot;
use crate::traits::{
    ConditionalOps, Deployment, KeyValueStore, NodeConnection, NodeId, Topology,
};

const DEFAULT_MAX_CONNECTIONS: usize = 1024;
const DEFAULT_POOL_WAIT: Duration = Duration::from_millis(300);

/// A stored value with an optional deadline
#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(bytes: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            bytes,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }
}

struct MemoryInner {
    entries: DashMap<String, StoredValue>,
    pool: Arc<Semaphore>,
    pool_wait: Duration,
    replication_stalled: AtomicBool,
    replication_failing: AtomicBool,
    write_latency_ms: AtomicU64,
    unavailable: AtomicBool,
    closing: AtomicBool,
}

impl MemoryInner {
    fn new(max_connections: usize, pool_wait: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            pool: Arc::new(Semaphore::new(max_connections)),
            pool_wait,
            replication_stalled: AtomicBool::new(false),
            replication_failing: AtomicBool::new(false),
            write_latency_ms: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
            closing: AtomicBool::new(false),
        }
    }
}

/// Topology of the in-memory store
#[derive(Debug, Clone)]
pub struct MemoryTopology {
    nodes: Vec<NodeId>,
    replicas: usize,
}

#[async_trait]
impl Topology for MemoryTopology {
    async fn node_owning(&self, key: &str) -> StoreResult<NodeId> {
        let index = key_slot(key) as usize % self.nodes.len();
        Ok(self.nodes[index].clone())
    }

    async fn replica_count_for(&self, node: &NodeId) -> StoreResult<usize> {
        if self.nodes.contains(node) {
            Ok(self.replicas)
        } else {
            Err(StoreError::Topology(format!("unknown node {}", node)))
        }
    }
}

/// In-memory store usable as a single node, a primary with replicas or a
/// sharded deployment
///
/// Replication is simulated: replicas acknowledge immediately unless
/// replication is stalled, in which case `wait_for_replication` blocks for the
/// whole timeout and reports zero acknowledgments.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
    topology: MemoryTopology,
    deployment: Deployment,
}

impl MemoryStore {
    /// Single node without replicas
    pub fn standalone() -> Self {
        Self::build(Deployment::Standalone, vec![NodeId::from("memory-0")], 0)
    }

    /// One primary with `replicas` replicas
    pub fn primary_replica(replicas: usize) -> Self {
        Self::build(
            Deployment::PrimaryReplica,
            vec![NodeId::from("memory-0")],
            replicas,
        )
    }

    /// `shards` primaries, each with `replicas_per_shard` replicas
    pub fn sharded(shards: usize, replicas_per_shard: usize) -> Self {
        let nodes = (0..shards.max(1))
            .map(|i| NodeId::new(format!("memory-{}", i)))
            .collect();
        Self::build(Deployment::Sharded, nodes, replicas_per_shard)
    }

    fn build(deployment: Deployment, nodes: Vec<NodeId>, replicas: usize) -> Self {
        Self {
            inner: Arc::new(MemoryInner::new(DEFAULT_MAX_CONNECTIONS, DEFAULT_POOL_WAIT)),
            topology: MemoryTopology { nodes, replicas },
            deployment,
        }
    }

    /// Limit concurrently borrowed connections; borrowers wait at most `wait`
    ///
    /// Must be called before the store is shared; it starts from an empty keyspace.
    pub fn with_pool_limit(self, max_connections: usize, wait: Duration) -> Self {
        Self {
            inner: Arc::new(MemoryInner::new(max_connections, wait)),
            ..self
        }
    }

    /// Make replicas stop acknowledging writes
    pub fn set_replication_stalled(&self, stalled: bool) {
        self.inner
            .replication_stalled
            .store(stalled, Ordering::SeqCst);
    }

    /// Make replica waits fail after the write has been applied
    pub fn set_replication_failing(&self, failing: bool) {
        self.inner
            .replication_failing
            .store(failing, Ordering::SeqCst);
    }

    /// Delay every write by `latency`
    pub fn set_write_latency(&self, latency: Duration) {
        self.inner
            .write_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make every connection attempt fail
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .entries
            .iter()
            .filter(|entry| entry.value().is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` holds a live value
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_live(now))
    }

    /// Remove every expired key, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.entries.len();
        self.inner.entries.retain(|_, value| value.is_live(now));
        before - self.inner.entries.len()
    }

    /// Start a background task that purges expired keys every `interval`
    /// until the store closes
    pub fn spawn_expiry_task(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if store.is_closing() {
                    break;
                }
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(count = purged, "Purged expired in-memory keys");
                }
            }
        })
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn deployment(&self) -> Deployment {
        self.deployment
    }

    fn topology(&self) -> &dyn Topology {
        &self.topology
    }

    async fn connect(&self, node: &NodeId) -> StoreResult<Box<dyn NodeConnection>> {
        if self.is_closing() {
            return Err(StoreError::Closed);
        }
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{} is unreachable", node)));
        }
        if !self.topology.nodes.contains(node) {
            return Err(StoreError::Topology(format!("unknown node {}", node)));
        }

        let permit = tokio::time::timeout(
            self.inner.pool_wait,
            self.inner.pool.clone().acquire_owned(),
        )
        .await
        .map_err(|_| StoreError::PoolTimeout(self.inner.pool_wait))?
        .map_err(|_| StoreError::Closed)?;

        Ok(Box::new(MemoryConnection {
            node: node.clone(),
            inner: self.inner.clone(),
            _permit: permit,
        }))
    }

    fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.inner.closing.store(true, Ordering::SeqCst);
    }
}

/// Connection borrowed from a `MemoryStore`
pub struct MemoryConnection {
    node: NodeId,
    inner: Arc<MemoryInner>,
    _permit: OwnedSemaphorePermit,
}

impl MemoryConnection {
    async fn simulate_write_latency(&self) {
        let latency = self.inner.write_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }
}

#[async_trait]
impl ConditionalOps for MemoryConnection {
    async fn compare_and_delete(&mut self, key: &str, expected: &str) -> StoreResult<bool> {
        let now = Instant::now();
        let removed = self
            .inner
            .entries
            .remove_if(key, |_, value| {
                value.is_live(now) && value.bytes == expected.as_bytes()
            });
        Ok(removed.is_some())
    }

    async fn compare_and_expire(
        &mut self,
        key: &str,
        expected: &str,
        ttl_ms: u64,
    ) -> StoreResult<bool> {
        let now = Instant::now();
        match self.inner.entries.get_mut(key) {
            Some(mut value) if value.is_live(now) && value.bytes == expected.as_bytes() => {
                value.expires_at = Some(now + Duration::from_millis(ttl_ms));
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl NodeConnection for MemoryConnection {
    fn node(&self) -> &NodeId {
        &self.node
    }

    async fn conditional_set(
        &mut self,
        key: &str,
        value: &str,
        ttl_ms: u64,
        only_if_absent: bool,
    ) -> StoreResult<bool> {
        self.simulate_write_latency().await;

        let now = Instant::now();
        let stored = StoredValue::new(
            value.as_bytes().to_vec(),
            Some(Duration::from_millis(ttl_ms)),
        );
        match self.inner.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if only_if_absent && occupied.get().is_live(now) {
                    return Ok(false);
                }
                occupied.insert(stored);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(stored);
            }
        }
        Ok(true)
    }

    async fn exists(&mut self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        Ok(self
            .inner
            .entries
            .get(key)
            .is_some_and(|value| value.is_live(now)))
    }

    async fn get_bit(&mut self, key: &str, offset: u64) -> StoreResult<bool> {
        let now = Instant::now();
        let byte = (offset / 8) as usize;
        let mask = 0x80u8 >> (offset % 8);
        Ok(self.inner.entries.get(key).is_some_and(|value| {
            value.is_live(now) && value.bytes.get(byte).is_some_and(|b| b & mask != 0)
        }))
    }

    async fn set_bit(&mut self, key: &str, offset: u64, bit: bool) -> StoreResult<bool> {
        self.simulate_write_latency().await;

        let now = Instant::now();
        let byte = (offset / 8) as usize;
        let mask = 0x80u8 >> (offset % 8);

        let mut value = self
            .inner
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredValue::new(Vec::new(), None));
        if !value.is_live(now) {
            *value = StoredValue::new(Vec::new(), None);
        }
        if value.bytes.len() <= byte {
            value.bytes.resize(byte + 1, 0);
        }

        let previous = value.bytes[byte] & mask != 0;
        if bit {
            value.bytes[byte] |= mask;
        } else {
            value.bytes[byte] &= !mask;
        }
        Ok(previous)
    }

    async fn pexpire(&mut self, key: &str, ttl_ms: u64) -> StoreResult<bool> {
        let now = Instant::now();
        match self.inner.entries.get_mut(key) {
            Some(mut value) if value.is_live(now) => {
                value.expires_at = Some(now + Duration::from_millis(ttl_ms));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pttl(&mut self, key: &str) -> StoreResult<Option<u64>> {
        let now = Instant::now();
        Ok(self.inner.entries.get(key).and_then(|value| {
            if !value.is_live(now) {
                return None;
            }
            value
                .expires_at
                .map(|deadline| deadline.saturating_duration_since(now).as_millis() as u64)
        }))
    }

    async fn wait_for_replication(
        &mut self,
        min_replicas: usize,
        timeout_ms: u64,
    ) -> StoreResult<usize> {
        if self.inner.replication_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "{} lost its replication link",
                self.node
            )));
        }
        if self.inner.replication_stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            return Ok(0);
        }
        Ok(min_replicas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn conn(store: &MemoryStore, key: &str) -> Box<dyn NodeConnection> {
        store.connection_for(key).await.unwrap()
    }

    #[tokio::test]
    async fn test_conditional_set_only_if_absent() {
        let store = MemoryStore::standalone();
        let mut c = conn(&store, "k").await;

        assert!(c.conditional_set("k", "a", 10_000, true).await.unwrap());
        assert!(!c.conditional_set("k", "b", 10_000, true).await.unwrap());
        // Unconditional write overwrites
        assert!(c.conditional_set("k", "c", 10_000, false).await.unwrap());
        assert!(!c.compare_and_delete("k", "a").await.unwrap());
        assert!(c.compare_and_delete("k", "c").await.unwrap());
        assert!(!c.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryStore::standalone();
        let mut c = conn(&store, "k").await;

        assert!(c.conditional_set("k", "a", 20, true).await.unwrap());
        assert!(c.exists("k").await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!c.exists("k").await.unwrap());
        // Expired key behaves as absent for NX writes
        assert!(c.conditional_set("k", "b", 1_000, true).await.unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_expire() {
        let store = MemoryStore::standalone();
        let mut c = conn(&store, "k").await;

        c.conditional_set("k", "token", 100, true).await.unwrap();
        assert!(!c.compare_and_expire("k", "other", 5_000).await.unwrap());
        assert!(c.compare_and_expire("k", "token", 5_000).await.unwrap());
        let ttl = c.pttl("k").await.unwrap().unwrap();
        assert!(ttl > 100 && ttl <= 5_000);
    }

    #[tokio::test]
    async fn test_bits_use_msb_first_order() {
        let store = MemoryStore::standalone();
        let mut c = conn(&store, "bits").await;

        assert!(!c.set_bit("bits", 0, true).await.unwrap());
        assert!(c.set_bit("bits", 0, true).await.unwrap());
        assert!(c.get_bit("bits", 0).await.unwrap());
        assert!(!c.get_bit("bits", 1).await.unwrap());
        assert!(!c.get_bit("bits", 10_000).await.unwrap());

        c.set_bit("bits", 15, false).await.unwrap();
        assert!(c.exists("bits").await.unwrap());
        assert_eq!(c.pttl("bits").await.unwrap(), None);
        assert!(c.pexpire("bits", 1_000).await.unwrap());
        assert!(c.pttl("bits").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sharded_routing_is_stable() {
        let store = MemoryStore::sharded(3, 2);
        let topology = store.topology();

        let a = topology.node_owning("{redlock}_a").await.unwrap();
        let b = topology.node_owning("{redlock}_b").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(topology.replica_count_for(&a).await.unwrap(), 2);
        assert!(
            topology
                .replica_count_for(&NodeId::from("nowhere"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_stalled_replication_blocks_for_timeout() {
        let store = MemoryStore::primary_replica(2);
        let mut c = conn(&store, "k").await;
        assert_eq!(c.wait_for_replication(2, 100).await.unwrap(), 2);

        store.set_replication_stalled(true);
        let start = Instant::now();
        assert_eq!(c.wait_for_replication(2, 30).await.unwrap(), 0);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_failing_replication_is_an_error() {
        let store = MemoryStore::primary_replica(1);
        store.set_replication_failing(true);
        let mut c = conn(&store, "k").await;

        assert!(c.conditional_set("k", "v", 1_000, true).await.unwrap());
        assert!(matches!(
            c.wait_for_replication(1, 100).await.unwrap_err(),
            StoreError::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_pool_exhaustion_times_out() {
        let store = MemoryStore::standalone().with_pool_limit(1, Duration::from_millis(20));
        let held = conn(&store, "k").await;

        let err = store.connection_for("k").await.err().unwrap();
        assert!(matches!(err, StoreError::PoolTimeout(_)));

        drop(held);
        assert!(store.connection_for("k").await.is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_and_closed() {
        let store = MemoryStore::standalone();
        store.set_unavailable(true);
        assert!(matches!(
            store.connection_for("k").await.err().unwrap(),
            StoreError::Unavailable(_)
        ));

        store.set_unavailable(false);
        store.close();
        assert!(store.is_closing());
        assert!(matches!(
            store.connection_for("k").await.err().unwrap(),
            StoreError::Closed
        ));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryStore::standalone();
        let mut c = conn(&store, "a").await;
        c.conditional_set("a", "1", 10, false).await.unwrap();
        c.conditional_set("b", "2", 60_000, false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired(), 1);
        assert!(store.contains_key("b"));
    }

    #[tokio::test]
    async fn test_expiry_task_purges_in_background() {
        let store = MemoryStore::standalone();
        let mut c = conn(&store, "a").await;
        c.conditional_set("a", "1", 10, false).await.unwrap();

        let task = store.spawn_expiry_task(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        task.abort();

        assert_eq!(store.purge_expired(), 0);
    }
}
