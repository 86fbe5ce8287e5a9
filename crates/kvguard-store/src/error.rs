//! Store error types

use kvguard_common::KvGuardError;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("failed to create connection pool: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    #[error("timed out after {0:?} waiting for a pooled connection")]
    PoolTimeout(std::time::Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("topology error: {0}")]
    Topology(String),

    #[error("store is closing")]
    Closed,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for KvGuardError {
    fn from(err: StoreError) -> Self {
        let context = match &err {
            StoreError::Pool(_) | StoreError::CreatePool(_) | StoreError::PoolTimeout(_) => {
                "failed to obtain store connection"
            }
            StoreError::Topology(_) => "failed to resolve store topology",
            StoreError::Closed => "store is closing",
            StoreError::Redis(_) | StoreError::Unavailable(_) => "store command failed",
        };
        KvGuardError::infrastructure(context, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::Unavailable("node-0 down".to_string());
        assert_eq!(err.to_string(), "store unavailable: node-0 down");

        let err = StoreError::Topology("no node owns slot 42".to_string());
        assert_eq!(err.to_string(), "topology error: no node owns slot 42");
    }

    #[test]
    fn test_into_infrastructure() {
        let err: KvGuardError = StoreError::Unavailable("down".to_string()).into();
        assert!(err.is_infrastructure());
        assert_eq!(err.to_string(), "infrastructure error: store command failed");

        let err: KvGuardError = StoreError::Closed.into();
        assert!(err.is_infrastructure());
    }
}
