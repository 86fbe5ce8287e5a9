// Pooled Redis connection pinned to one node

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::traits::{ConditionalOps, NodeConnection, NodeId};

use super::scripts::{COMPARE_AND_DELETE, COMPARE_AND_EXPIRE};

/// A connection borrowed from a node's pool; dropping it returns it to the pool
pub struct RedisNodeConnection {
    node: NodeId,
    conn: Connection,
}

impl RedisNodeConnection {
    pub(crate) async fn borrow(node: &NodeId, pool: &Pool) -> StoreResult<Self> {
        let conn = pool.get().await?;
        Ok(Self {
            node: node.clone(),
            conn,
        })
    }
}

#[async_trait]
impl ConditionalOps for RedisNodeConnection {
    async fn compare_and_delete(&mut self, key: &str, expected: &str) -> StoreResult<bool> {
        let deleted: i64 = COMPARE_AND_DELETE
            .key(key)
            .arg(expected)
            .invoke_async(&mut self.conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn compare_and_expire(
        &mut self,
        key: &str,
        expected: &str,
        ttl_ms: u64,
    ) -> StoreResult<bool> {
        let refreshed: i64 = COMPARE_AND_EXPIRE
            .key(key)
            .arg(expected)
            .arg(ttl_ms)
            .invoke_async(&mut self.conn)
            .await?;
        Ok(refreshed == 1)
    }
}

#[async_trait]
impl NodeConnection for RedisNodeConnection {
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
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(ttl_ms);
        if only_if_absent {
            cmd.arg("NX");
        }
        let reply: Option<String> = cmd.query_async(&mut self.conn).await?;
        Ok(reply.is_some())
    }

    async fn exists(&mut self, key: &str) -> StoreResult<bool> {
        let count: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.conn)
            .await?;
        Ok(count > 0)
    }

    async fn get_bit(&mut self, key: &str, offset: u64) -> StoreResult<bool> {
        let bit: i64 = redis::cmd("GETBIT")
            .arg(key)
            .arg(offset)
            .query_async(&mut self.conn)
            .await?;
        Ok(bit == 1)
    }

    async fn set_bit(&mut self, key: &str, offset: u64, value: bool) -> StoreResult<bool> {
        let previous: i64 = redis::cmd("SETBIT")
            .arg(key)
            .arg(offset)
            .arg(u8::from(value))
            .query_async(&mut self.conn)
            .await?;
        Ok(previous == 1)
    }

    async fn pexpire(&mut self, key: &str, ttl_ms: u64) -> StoreResult<bool> {
        let applied: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_ms)
            .query_async(&mut self.conn)
            .await?;
        Ok(applied == 1)
    }

    async fn pttl(&mut self, key: &str) -> StoreResult<Option<u64>> {
        // -2: missing key, -1: no expiry
        let ttl: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut self.conn)
            .await?;
        Ok(u64::try_from(ttl).ok())
    }

    async fn wait_for_replication(
        &mut self,
        min_replicas: usize,
        timeout_ms: u64,
    ) -> StoreResult<usize> {
        let acked: i64 = redis::cmd("WAIT")
            .arg(min_replicas)
            .arg(timeout_ms)
            .query_async(&mut self.conn)
            .await?;
        Ok(acked.max(0) as usize)
    }
}

/// Create the connection pool for one node
pub(crate) fn create_pool(config: &StoreConfig, url: &str) -> StoreResult<Pool> {
    let mut cfg = deadpool_redis::Config::from_url(url);
    cfg.pool = Some(config.pool_config());
    Ok(cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?)
}

/// Open `min_idle` connections so the first callers do not pay for the handshake
pub(crate) async fn prepare_pool(pool: &Pool, min_idle: usize) {
    info!(connections = min_idle, "Preparing store connection pool");
    let results = futures::future::join_all((0..min_idle).map(|_| pool.get())).await;
    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        warn!(failed, "Prepare pool error, some connections could not be opened");
    }
}
