//! Error types and error codes for kvguard
//!
//! This module defines:
//! - `KvGuardError`: the three-way failure taxonomy shared by locks and filters
//! - `ErrorCode`: structured error codes for callers that report failures upstream

use serde::{Deserialize, Serialize};

/// Failure taxonomy for lock and filter operations
///
/// Lock contention is normally reported as a plain `false`; the `Contention`
/// variant only appears when a caller explicitly asks for it (for example a
/// guarded run configured to fail on contention).
#[derive(thiserror::Error, Debug)]
pub enum KvGuardError {
    /// Invalid ttl, retry budget or filter sizing, raised before any store access
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("lock '{0}' is already held by another owner")]
    Contention(String),

    /// Connection, pool or transport failure with the underlying cause attached
    #[error("infrastructure error: {context}")]
    Infrastructure {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

impl KvGuardError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn infrastructure(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Infrastructure {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Contention(_))
    }

    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Infrastructure { .. })
    }

    /// Map the error onto its reporting code
    pub fn error_code(&self) -> ErrorCode<'static> {
        match self {
            Self::Configuration(_) => PARAMETER_VALIDATE_ERROR,
            Self::Contention(_) => LOCK_CONTENDED,
            Self::Infrastructure { .. } => STORE_UNAVAILABLE,
        }
    }
}

pub type Result<T> = std::result::Result<T, KvGuardError>;

/// Error code structure for reporting
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const SUCCESS: ErrorCode<'static> = ErrorCode {
    code: 0,
    message: "success",
};

pub const PARAMETER_VALIDATE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 20002,
    message: "parameter validate error",
};

pub const LOCK_CONTENDED: ErrorCode<'static> = ErrorCode {
    code: 24001,
    message: "lock is already locked",
};

pub const STORE_UNAVAILABLE: ErrorCode<'static> = ErrorCode {
    code: 30001,
    message: "failed to obtain store connection",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kvguard_error_display() {
        let err = KvGuardError::configuration("retry time is too long");
        assert_eq!(
            format!("{}", err),
            "configuration error: retry time is too long"
        );

        let err = KvGuardError::Contention("orders".to_string());
        assert_eq!(
            format!("{}", err),
            "lock 'orders' is already held by another owner"
        );
    }

    #[test]
    fn test_infrastructure_keeps_source() {
        let err = KvGuardError::infrastructure(
            "failed to obtain store connection",
            anyhow::anyhow!("connection refused"),
        );
        assert!(err.is_infrastructure());
        assert_eq!(
            err.to_string(),
            "infrastructure error: failed to obtain store connection"
        );
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(SUCCESS.code, 0);
        assert_eq!(
            KvGuardError::configuration("x").error_code(),
            PARAMETER_VALIDATE_ERROR
        );
        assert_eq!(
            KvGuardError::Contention("l".into()).error_code().code,
            24001
        );
        assert!(!KvGuardError::Contention("l".into()).is_configuration());
    }
}
