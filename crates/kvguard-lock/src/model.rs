//! Lock data model
//!
//! Calling contexts, the per-context ownership registry and lock settings.

use std::collections::HashMap;
use std::fmt;

use dashmap::DashMap;
use kvguard_common::{
    DEFAULT_LOCK_TTL_MS, DEFAULT_REPLICATION_WAIT_MS, DEFAULT_RETRY_BUDGET_MS,
    RETRY_POLL_INTERVAL_MS,
};
use serde::{Deserialize, Serialize};

/// Identity of a calling context (a task, a request, a worker)
///
/// Locks are reentrant per context: a context holding a lock refreshes it
/// instead of contending with itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh, random context id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ContextId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A lock held by a context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub lock_name: String,
    pub owner_token: String,
}

/// Mint a random 128-bit owner token, hex-encoded
pub fn mint_owner_token() -> String {
    const_hex::encode(rand::random::<[u8; 16]>())
}

/// Owner tokens of the locks each context currently holds
///
/// A context has at most one entry per lock name. Contexts never see each
/// other's entries; disposing a context is up to the caller.
#[derive(Debug, Default)]
pub struct LockRegistry {
    contexts: DashMap<ContextId, HashMap<String, String>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token held by `ctx` for `lock_name`
    pub fn held(&self, ctx: &ContextId, lock_name: &str) -> Option<String> {
        self.contexts
            .get(ctx)
            .and_then(|locks| locks.get(lock_name).cloned())
    }

    /// Record or overwrite the token held by `ctx` for `lock_name`
    pub fn record(&self, ctx: &ContextId, lock_name: &str, owner_token: String) {
        self.contexts
            .entry(ctx.clone())
            .or_default()
            .insert(lock_name.to_string(), owner_token);
    }

    /// Forget `lock_name` for `ctx`, returning the token it held
    pub fn remove(&self, ctx: &ContextId, lock_name: &str) -> Option<String> {
        let removed = self
            .contexts
            .get_mut(ctx)
            .and_then(|mut locks| locks.remove(lock_name));
        self.contexts.remove_if(ctx, |_, locks| locks.is_empty());
        removed
    }

    /// Locks held by `ctx`
    pub fn records(&self, ctx: &ContextId) -> Vec<LockRecord> {
        self.contexts
            .get(ctx)
            .map(|locks| {
                locks
                    .iter()
                    .map(|(name, token)| LockRecord {
                        lock_name: name.clone(),
                        owner_token: token.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of locks held by `ctx`
    pub fn held_count(&self, ctx: &ContextId) -> usize {
        self.contexts.get(ctx).map_or(0, |locks| locks.len())
    }

    /// Drop every entry of `ctx`, returning how many locks were forgotten
    ///
    /// Store keys are left to expire through their ttl.
    pub fn dispose_context(&self, ctx: &ContextId) -> usize {
        self.contexts
            .remove(ctx)
            .map_or(0, |(_, locks)| locks.len())
    }

    /// Number of contexts holding at least one lock
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }
}

/// Default timings used by the convenience lock operations
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Lock lifetime (default: 5000ms)
    pub ttl_ms: u64,
    /// Upper bound on waiting for replica acknowledgment (default: 500ms)
    pub replication_wait_ms: u64,
    /// Retry budget of `try_lock_with_retry` (default: 60s)
    pub retry_budget_ms: u64,
    /// Sleep between two attempts while retrying (default: 5ms)
    pub poll_interval_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_LOCK_TTL_MS,
            replication_wait_ms: DEFAULT_REPLICATION_WAIT_MS,
            retry_budget_ms: DEFAULT_RETRY_BUDGET_MS,
            poll_interval_ms: RETRY_POLL_INTERVAL_MS,
        }
    }
}
