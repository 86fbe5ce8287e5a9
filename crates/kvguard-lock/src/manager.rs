// Distributed lock manager
// Acquire, refresh, release and guarded execution over a KeyValueStore

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use kvguard_common::{
    KvGuardError, MAX_LOCK_REPLICA_QUORUM, MAX_RETRY_BUDGET_MS, Result, lock_key,
};
use kvguard_store::{KeyValueStore, NodeConnection, NodeId};
use tracing::{debug, info, warn};

use crate::metrics::{self, AcquireOutcome};
use crate::model::{ContextId, LockRegistry, LockSettings, mint_owner_token};

/// Mutual exclusion over named resources, reentrant per calling context
///
/// Correctness rests on the store's atomic conditional operations; no local
/// mutex guards a lock name across contexts.
pub struct LockManager {
    store: Arc<dyn KeyValueStore>,
    registry: LockRegistry,
    settings: LockSettings,
}

impl LockManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_settings(store, LockSettings::default())
    }

    pub fn with_settings(store: Arc<dyn KeyValueStore>, settings: LockSettings) -> Self {
        info!(deployment = %store.deployment(), "LockManager initialized");
        Self {
            store,
            registry: LockRegistry::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    pub fn registry(&self) -> &LockRegistry {
        &self.registry
    }

    /// Acquire `lock_name` for `ctx`, or refresh it when `ctx` already holds it
    ///
    /// Returns `Ok(false)` when the lock is held elsewhere, when the ttl is zero,
    /// when the store is closing, or when the acquisition itself took the whole
    /// ttl. Transport and pool failures are returned as errors.
    pub async fn acquire(
        &self,
        ctx: &ContextId,
        lock_name: &str,
        ttl_ms: u64,
        max_replication_wait_ms: u64,
    ) -> Result<bool> {
        if ttl_ms == 0 {
            return Ok(false);
        }
        let started = Instant::now();
        if self.store.is_closing() {
            metrics::record_acquire(AcquireOutcome::Closing, 0.0);
            return Ok(false);
        }

        let result = self
            .acquire_inner(ctx, lock_name, ttl_ms, max_replication_wait_ms.min(ttl_ms), started)
            .await;
        let outcome = match &result {
            Ok(outcome) => *outcome,
            Err(_) => AcquireOutcome::Error,
        };
        metrics::record_acquire(outcome, started.elapsed().as_secs_f64());

        result.map(|outcome| {
            matches!(outcome, AcquireOutcome::Acquired | AcquireOutcome::Refreshed)
        })
    }

    async fn acquire_inner(
        &self,
        ctx: &ContextId,
        lock_name: &str,
        ttl_ms: u64,
        wait_ms: u64,
        started: Instant,
    ) -> Result<AcquireOutcome> {
        let key = lock_key(lock_name);

        if let Some(token) = self.registry.held(ctx, lock_name) {
            let mut conn = self.store.connection_for(&key).await?;
            let refreshed = conn.compare_and_expire(&key, &token, ttl_ms).await?;
            debug!(lock = %lock_name, context = %ctx, refreshed, "Lock refresh");
            return Ok(if refreshed {
                AcquireOutcome::Refreshed
            } else {
                AcquireOutcome::RefreshFailed
            });
        }

        let token = mint_owner_token();
        let outcome = if self.store.deployment().is_sharded() {
            self.acquire_sharded(&key, &token, ttl_ms, wait_ms).await?
        } else {
            self.acquire_single(&key, &token, ttl_ms, started).await?
        };

        if outcome == AcquireOutcome::Acquired {
            self.registry.record(ctx, lock_name, token);
            debug!(lock = %lock_name, context = %ctx, ttl_ms, "Lock acquired");
        } else {
            debug!(lock = %lock_name, context = %ctx, outcome = outcome.as_str(), "Lock not acquired");
        }
        Ok(outcome)
    }

    async fn acquire_single(
        &self,
        key: &str,
        token: &str,
        ttl_ms: u64,
        started: Instant,
    ) -> Result<AcquireOutcome> {
        let mut conn = self.store.connection_for(key).await?;
        if !conn.conditional_set(key, token, ttl_ms, true).await? {
            return Ok(AcquireOutcome::Contended);
        }
        if started.elapsed() >= Duration::from_millis(ttl_ms) {
            return Ok(AcquireOutcome::TimedOut);
        }
        Ok(AcquireOutcome::Acquired)
    }

    async fn acquire_sharded(
        &self,
        key: &str,
        token: &str,
        ttl_ms: u64,
        wait_ms: u64,
    ) -> Result<AcquireOutcome> {
        let node = self.store.topology().node_owning(key).await?;
        let mut conn = self.store.connect(&node).await?;

        let write_started = Instant::now();
        if !conn.conditional_set(key, token, ttl_ms, true).await? {
            return Ok(AcquireOutcome::Contended);
        }

        match self
            .await_replicas(conn.as_mut(), &node, key, wait_ms)
            .await
        {
            Ok(()) if write_started.elapsed() < Duration::from_millis(ttl_ms) => {
                Ok(AcquireOutcome::Acquired)
            }
            Ok(()) => {
                rollback(conn.as_mut(), key, token).await;
                Ok(AcquireOutcome::TimedOut)
            }
            Err(e) => {
                rollback(conn.as_mut(), key, token).await;
                Err(e)
            }
        }
    }

    async fn await_replicas(
        &self,
        conn: &mut dyn NodeConnection,
        node: &NodeId,
        key: &str,
        wait_ms: u64,
    ) -> Result<()> {
        let replicas = self.store.topology().replica_count_for(node).await?;
        let quorum = replicas.min(MAX_LOCK_REPLICA_QUORUM);
        if quorum == 0 {
            return Ok(());
        }
        let acked = conn.wait_for_replication(quorum, wait_ms).await?;
        if acked < quorum {
            debug!(key = %key, node = %node, acked, quorum, "Replica quorum not reached in time");
        }
        Ok(())
    }

    /// Poll `acquire` every few milliseconds until it succeeds or
    /// `retry_budget_ms` elapses
    ///
    /// A budget above five minutes is rejected before touching the store.
    /// Infrastructure errors end the loop immediately.
    pub async fn acquire_with_retry(
        &self,
        ctx: &ContextId,
        lock_name: &str,
        ttl_ms: u64,
        max_replication_wait_ms: u64,
        retry_budget_ms: u64,
    ) -> Result<bool> {
        if retry_budget_ms > MAX_RETRY_BUDGET_MS {
            return Err(KvGuardError::configuration(format!(
                "retry time {}ms exceeds the maximum of {}ms",
                retry_budget_ms, MAX_RETRY_BUDGET_MS
            )));
        }

        let deadline = Instant::now() + Duration::from_millis(retry_budget_ms);
        let poll = Duration::from_millis(self.settings.poll_interval_ms);
        loop {
            if self
                .acquire(ctx, lock_name, ttl_ms, max_replication_wait_ms)
                .await?
            {
                return Ok(true);
            }
            if self.store.is_closing() || Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Acquire with the default ttl and replication wait
    pub async fn try_lock(&self, ctx: &ContextId, lock_name: &str) -> Result<bool> {
        self.acquire(
            ctx,
            lock_name,
            self.settings.ttl_ms,
            self.settings.replication_wait_ms,
        )
        .await
    }

    /// Acquire with the default ttl, replication wait and retry budget
    pub async fn try_lock_with_retry(&self, ctx: &ContextId, lock_name: &str) -> Result<bool> {
        self.acquire_with_retry(
            ctx,
            lock_name,
            self.settings.ttl_ms,
            self.settings.replication_wait_ms,
            self.settings.retry_budget_ms,
        )
        .await
    }

    /// Release `lock_name` held by `ctx`
    ///
    /// - not held by `ctx`: `false`
    /// - deleted our own key, or the key already expired: `true`
    /// - the key now belongs to another owner: `false`
    ///
    /// The registry entry is cleared in every case where it existed. Only
    /// infrastructure failures are returned as errors.
    pub async fn release(&self, ctx: &ContextId, lock_name: &str) -> Result<bool> {
        let Some(token) = self.registry.held(ctx, lock_name) else {
            metrics::record_release("not_held");
            return Ok(false);
        };

        let key = lock_key(lock_name);
        let mut conn = self.store.connection_for(&key).await?;
        if conn.compare_and_delete(&key, &token).await? {
            self.registry.remove(ctx, lock_name);
            metrics::record_release("released");
            debug!(lock = %lock_name, context = %ctx, "Lock released");
            return Ok(true);
        }

        let still_exists = conn.exists(&key).await?;
        self.registry.remove(ctx, lock_name);
        if still_exists {
            metrics::record_release("owner_mismatch");
            warn!(lock = %lock_name, context = %ctx, "Lock is now held by another owner");
            Ok(false)
        } else {
            metrics::record_release("expired");
            debug!(lock = %lock_name, context = %ctx, "Lock already expired");
            Ok(true)
        }
    }

    /// Run `body` while holding `lock_name`
    ///
    /// When the lock is not obtained, returns `Ok(None)`, or a contention error
    /// when `throw_on_contention` is set. Otherwise the lock is released on
    /// every exit path, panics included, and the body's outcome is returned
    /// unchanged. Dropping the returned future mid-body forgets the lock and
    /// deletes its key from a spawned task.
    pub async fn run_guarded<T, E, F, Fut>(
        &self,
        ctx: &ContextId,
        lock_name: &str,
        ttl_ms: u64,
        throw_on_contention: bool,
        body: F,
    ) -> std::result::Result<Option<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<KvGuardError>,
    {
        let acquired = self
            .acquire(ctx, lock_name, ttl_ms, self.settings.replication_wait_ms)
            .await?;
        if !acquired {
            if throw_on_contention {
                return Err(KvGuardError::Contention(lock_name.to_string()).into());
            }
            return Ok(None);
        }

        let mut guard = ReleaseOnDrop::new(self, ctx, lock_name);
        let outcome = AssertUnwindSafe(async move { body().await })
            .catch_unwind()
            .await;

        if let Err(e) = self.release(ctx, lock_name).await {
            warn!(lock = %lock_name, context = %ctx, error = %e, "Failed to release guarded lock, leaving it to expire");
        }
        guard.disarm();

        match outcome {
            Ok(result) => result.map(Some),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Forget every lock held by `ctx`; the store keys expire on their own
    pub fn dispose_context(&self, ctx: &ContextId) -> usize {
        self.registry.dispose_context(ctx)
    }
}

/// Releases a guarded lock whose `run_guarded` future was dropped before the
/// body finished
struct ReleaseOnDrop<'a> {
    store: Arc<dyn KeyValueStore>,
    registry: &'a LockRegistry,
    ctx: &'a ContextId,
    lock_name: &'a str,
    armed: bool,
}

impl<'a> ReleaseOnDrop<'a> {
    fn new(locks: &'a LockManager, ctx: &'a ContextId, lock_name: &'a str) -> Self {
        Self {
            store: locks.store.clone(),
            registry: &locks.registry,
            ctx,
            lock_name,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(token) = self.registry.remove(self.ctx, self.lock_name) else {
            return;
        };
        let lock_name = self.lock_name.to_string();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(lock = %lock_name, context = %self.ctx, "No runtime to release abandoned lock, leaving it to expire");
            return;
        };

        let store = self.store.clone();
        handle.spawn(async move {
            let key = lock_key(&lock_name);
            let released = match store.connection_for(&key).await {
                Ok(mut conn) => conn.compare_and_delete(&key, &token).await,
                Err(e) => Err(e),
            };
            match released {
                Ok(deleted) => debug!(lock = %lock_name, deleted, "Released abandoned guarded lock"),
                Err(e) => warn!(lock = %lock_name, error = %e, "Failed to release abandoned guarded lock, leaving it to expire"),
            }
        });
    }
}

async fn rollback(conn: &mut dyn NodeConnection, key: &str, token: &str) {
    match conn.compare_and_delete(key, token).await {
        Ok(deleted) => debug!(key = %key, deleted, "Rolled back unreplicated lock"),
        Err(e) => warn!(key = %key, error = %e, "Rollback of unreplicated lock failed"),
    }
}
