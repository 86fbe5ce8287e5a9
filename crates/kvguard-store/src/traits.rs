//! Store contract traits
//!
//! The lock manager and the membership filter only talk to the store through
//! these traits:
//! - `ConditionalOps`: single round-trip compare-and-delete / compare-and-expire
//! - `NodeConnection`: a pooled connection pinned to one node
//! - `Topology`: node-for-key and replica-count lookups
//! - `KeyValueStore`: the entry point handing out node connections

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Identifier of a store node (primary)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// How the store is deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deployment {
    /// One node, no replicas
    Standalone,
    /// One primary with asynchronous replicas
    PrimaryReplica,
    /// Keys partitioned over several primaries, each with replicas
    Sharded,
}

impl Deployment {
    pub fn is_sharded(self) -> bool {
        self == Deployment::Sharded
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deployment::Standalone => write!(f, "standalone"),
            Deployment::PrimaryReplica => write!(f, "primary-replica"),
            Deployment::Sharded => write!(f, "sharded"),
        }
    }
}

/// Atomic conditional operations keyed on the current value
///
/// Each call must be a single atomic round trip on the server (a script,
/// a transaction or a native compare-and-swap).
#[async_trait]
pub trait ConditionalOps: Send {
    /// Delete `key` only if its value equals `expected`
    async fn compare_and_delete(&mut self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Set a new ttl on `key` only if its value equals `expected`
    async fn compare_and_expire(
        &mut self,
        key: &str,
        expected: &str,
        ttl_ms: u64,
    ) -> StoreResult<bool>;
}

/// A pooled connection to a single node, returned to the pool on drop
#[async_trait]
pub trait NodeConnection: ConditionalOps {
    /// The node this connection talks to
    fn node(&self) -> &NodeId;

    /// Set `key` to `value` with a millisecond ttl
    ///
    /// With `only_if_absent` the write only happens when the key does not
    /// exist. Returns whether the value was written.
    async fn conditional_set(
        &mut self,
        key: &str,
        value: &str,
        ttl_ms: u64,
        only_if_absent: bool,
    ) -> StoreResult<bool>;

    async fn exists(&mut self, key: &str) -> StoreResult<bool>;

    async fn get_bit(&mut self, key: &str, offset: u64) -> StoreResult<bool>;

    /// Set one bit and return its previous value
    async fn set_bit(&mut self, key: &str, offset: u64, value: bool) -> StoreResult<bool>;

    /// Set a millisecond ttl on an existing key
    async fn pexpire(&mut self, key: &str, ttl_ms: u64) -> StoreResult<bool>;

    /// Remaining ttl in milliseconds, `None` when the key is missing or persistent
    async fn pttl(&mut self, key: &str) -> StoreResult<Option<u64>>;

    /// Block until `min_replicas` replicas acknowledged the writes issued on
    /// this connection, or `timeout_ms` elapsed. Returns the acknowledged count.
    async fn wait_for_replication(&mut self, min_replicas: usize, timeout_ms: u64)
    -> StoreResult<usize>;
}

/// Shard ownership lookups
#[async_trait]
pub trait Topology: Send + Sync {
    /// The primary owning `key`
    async fn node_owning(&self, key: &str) -> StoreResult<NodeId>;

    /// Number of replicas attached to `node`
    async fn replica_count_for(&self, node: &NodeId) -> StoreResult<usize>;
}

/// Topology of a deployment with a single primary
#[derive(Debug, Clone)]
pub struct SingleNodeTopology {
    node: NodeId,
    replicas: usize,
}

impl SingleNodeTopology {
    pub fn new(node: NodeId, replicas: usize) -> Self {
        Self { node, replicas }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }
}

#[async_trait]
impl Topology for SingleNodeTopology {
    async fn node_owning(&self, _key: &str) -> StoreResult<NodeId> {
        Ok(self.node.clone())
    }

    async fn replica_count_for(&self, _node: &NodeId) -> StoreResult<usize> {
        Ok(self.replicas)
    }
}

/// Pooled access to a single-node, primary-replica or sharded store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    fn deployment(&self) -> Deployment;

    fn topology(&self) -> &dyn Topology;

    /// Borrow a connection to `node`, waiting a bounded time when the pool is exhausted
    async fn connect(&self, node: &NodeId) -> StoreResult<Box<dyn NodeConnection>>;

    /// Borrow a connection to the node owning `key`
    async fn connection_for(&self, key: &str) -> StoreResult<Box<dyn NodeConnection>> {
        let node = self.topology().node_owning(key).await?;
        self.connect(&node).await
    }

    /// Whether the store is shutting down and refuses new work
    fn is_closing(&self) -> bool {
        false
    }

    /// Stop handing out connections
    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_node_topology() {
        let topology = SingleNodeTopology::new(NodeId::from("primary"), 2);
        let node = topology.node_owning("any-key").await.unwrap();
        assert_eq!(node.as_str(), "primary");
        assert_eq!(topology.replica_count_for(&node).await.unwrap(), 2);
    }

    #[test]
    fn test_deployment_display() {
        assert_eq!(Deployment::Sharded.to_string(), "sharded");
        assert!(Deployment::Sharded.is_sharded());
        assert!(!Deployment::PrimaryReplica.is_sharded());
    }
}
