// Redis store for a single node or a primary with replicas

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use deadpool_redis::Pool;
use tracing::info;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::traits::{
    Deployment, KeyValueStore, NodeConnection, NodeId, SingleNodeTopology, Topology,
};

use super::connection::{RedisNodeConnection, create_pool, prepare_pool};

/// Pooled access to one Redis primary
pub struct RedisStore {
    pool: Pool,
    topology: SingleNodeTopology,
    deployment: Deployment,
    closing: AtomicBool,
}

impl RedisStore {
    /// Create the pool and probe the node's replication role
    pub async fn open(config: &StoreConfig) -> StoreResult<Self> {
        let url = config.url();
        let pool = create_pool(config, &url)?;
        if config.prepare_pool {
            prepare_pool(&pool, config.min_idle).await;
        }

        let mut conn = pool.get().await?;
        let info: String = redis::cmd("INFO")
            .arg("replication")
            .query_async(&mut conn)
            .await?;
        drop(conn);

        let replicas = connected_replicas(&info);
        let deployment = if replicas > 0 {
            Deployment::PrimaryReplica
        } else {
            Deployment::Standalone
        };
        let node = NodeId::new(format!("{}:{}", config.address, config.port));

        info!(
            node = %node,
            deployment = %deployment,
            max_total = config.max_total,
            "Redis store initialized"
        );

        Ok(Self {
            pool,
            topology: SingleNodeTopology::new(node, replicas),
            deployment,
            closing: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
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
        if node != self.topology.node() {
            return Err(StoreError::Topology(format!("unknown node {}", node)));
        }
        Ok(Box::new(RedisNodeConnection::borrow(node, &self.pool).await?))
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.pool.close();
        info!("Redis store closed");
    }
}

/// Read `connected_slaves` from an `INFO replication` reply
fn connected_replicas(info: &str) -> usize {
    info.lines()
        .find_map(|line| line.trim().strip_prefix("connected_slaves:"))
        .and_then(|count| count.trim().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_replicas() {
        let info = "# Replication\r\nrole:master\r\nconnected_slaves:2\r\nslave0:ip=10.0.0.2\r\n";
        assert_eq!(connected_replicas(info), 2);
        assert_eq!(connected_replicas("# Replication\r\nrole:slave\r\n"), 0);
        assert_eq!(connected_replicas("connected_slaves:x"), 0);
    }
}
