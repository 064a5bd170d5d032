//! Error types for the askdb access layer.
//!
//! This module defines all error types using `thiserror`. Every variant
//! names the failing operation and carries the underlying cause so an
//! operator can diagnose a failure without the library ever echoing
//! credentials or connection URIs.

use std::time::Duration;
use thiserror::Error;

/// Configuration rejected before any network activity.
///
/// Raised by [`PoolConfig::validate`](crate::config::PoolConfig::validate)
/// and by the settings loader; a pool is never constructed from an invalid
/// configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {name}")]
    Missing { name: &'static str },

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("pool sizing invalid: min_size {min} exceeds max_size {max}")]
    PoolSizing { min: u32, max: u32 },

    #[error("max_idle_lifetime must be greater than zero")]
    ZeroIdleLifetime,
}

impl ConfigError {
    /// Create an invalid-value error.
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            reason: reason.into(),
        }
    }
}

/// Pool lifecycle and acquisition failures.
#[derive(Error, Debug)]
pub enum PoolError {
    /// Eager startup failed; the pool stays uninitialized and may be retried.
    #[error("pool initialization failed")]
    InitializationFailed {
        #[source]
        cause: sqlx::Error,
    },

    /// An acquire hit an underlying I/O failure.
    #[error("connection acquisition failed")]
    AcquisitionFailed {
        #[source]
        cause: sqlx::Error,
    },

    /// The pool is saturated and no connection freed up within the wait.
    #[error("connection pool exhausted: no connection freed within {waited:?}")]
    Exhausted { waited: Duration },

    /// A lease was released (or used) after it had already been released.
    #[error("connection lease already released")]
    DoubleRelease,

    /// A transaction was requested on a handle that is already inside one.
    #[error("nested transactions are not supported on a single connection")]
    NestedTransaction,

    /// A begin/commit/rollback statement failed on the wire.
    #[error("transaction {operation} failed")]
    TransactionFailed {
        operation: &'static str,
        #[source]
        cause: sqlx::Error,
    },

    /// The pool has been closed; acquisition fails fast and never blocks.
    #[error("connection pool is closed")]
    Closed,
}

impl PoolError {
    /// Wrap an initialization failure.
    pub fn init(cause: sqlx::Error) -> Self {
        Self::InitializationFailed { cause }
    }

    /// Wrap a begin/commit/rollback failure with the operation name.
    pub fn transaction(operation: &'static str, cause: sqlx::Error) -> Self {
        Self::TransactionFailed { operation, cause }
    }

    /// Map an acquire-path sqlx error onto the pool taxonomy.
    ///
    /// `PoolTimedOut` means saturation, `PoolClosed` means a concurrent
    /// shutdown won the race; everything else is an I/O-level failure.
    pub fn from_acquire(cause: sqlx::Error, waited: Duration) -> Self {
        match cause {
            sqlx::Error::PoolTimedOut => Self::Exhausted { waited },
            sqlx::Error::PoolClosed => Self::Closed,
            cause => Self::AcquisitionFailed { cause },
        }
    }

    /// Whether the caller may reasonably retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InitializationFailed { .. } | Self::AcquisitionFailed { .. } | Self::Exhausted { .. }
        )
    }
}

/// Schema reflection failures.
#[derive(Error, Debug)]
pub enum ReflectionError {
    /// The catalog metadata query failed; no partial document is returned.
    #[error("schema metadata query failed")]
    QueryFailed {
        #[source]
        cause: sqlx::Error,
    },
}

impl From<sqlx::Error> for ReflectionError {
    fn from(cause: sqlx::Error) -> Self {
        Self::QueryFailed { cause }
    }
}

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timed_out_maps_to_exhausted() {
        let err = PoolError::from_acquire(sqlx::Error::PoolTimedOut, Duration::from_secs(30));
        assert!(matches!(err, PoolError::Exhausted { .. }));
        assert!(err.to_string().contains("exhausted"));
    }

    #[test]
    fn test_pool_closed_maps_to_closed() {
        let err = PoolError::from_acquire(sqlx::Error::PoolClosed, Duration::from_secs(30));
        assert!(matches!(err, PoolError::Closed));
    }

    #[test]
    fn test_other_errors_map_to_acquisition_failed() {
        let err = PoolError::from_acquire(sqlx::Error::WorkerCrashed, Duration::from_secs(1));
        assert!(matches!(err, PoolError::AcquisitionFailed { .. }));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PoolError::Exhausted { waited: Duration::from_secs(1) }.is_retryable());
        assert!(PoolError::init(sqlx::Error::WorkerCrashed).is_retryable());
        assert!(!PoolError::Closed.is_retryable());
        assert!(!PoolError::NestedTransaction.is_retryable());
        assert!(!PoolError::DoubleRelease.is_retryable());
    }

    #[test]
    fn test_transaction_error_names_operation() {
        let err = PoolError::transaction("commit", sqlx::Error::WorkerCrashed);
        assert!(err.to_string().contains("commit"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::PoolSizing { min: 8, max: 4 };
        assert!(err.to_string().contains("min_size 8"));
        assert!(err.to_string().contains("max_size 4"));

        let err = ConfigError::invalid("port", "not a number");
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn test_reflection_error_from_sqlx() {
        let err = ReflectionError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, ReflectionError::QueryFailed { .. }));
        assert!(err.to_string().contains("metadata query"));
    }
}
