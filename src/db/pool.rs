//! Connection pool lifecycle management.
//!
//! [`DatabasePool`] mediates all access to the database on behalf of the
//! query layer. It wraps a sqlx `PgPool` (which owns the physical
//! connection set, sizing, idle pruning and acquire waits) and supplies the
//! process-level lifecycle on top: `Uninitialized -> Ready -> Closed`,
//! single-flight lazy initialization, lease accounting, and a bounded drain
//! at shutdown. Construct one pool per process and share it by handle;
//! reuse after close is refused.

use futures_util::future::{BoxFuture, try_join_all};
use sqlx::PgConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::db::lease::{LeaseTracker, LeasedConnection, TransactionScope};
use crate::error::{ConfigError, PoolError, PoolResult};

/// Observable lifecycle phase of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPhase {
    Uninitialized,
    Ready,
    Closed,
}

impl std::fmt::Display for PoolPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Ready => write!(f, "ready"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Lifecycle-managed PostgreSQL connection pool.
pub struct DatabasePool {
    config: PoolConfig,
    /// Single-flight initialization cell: concurrent first callers await
    /// one initialization instead of racing their own.
    inner: OnceCell<PgPool>,
    closed: AtomicBool,
    leases: Arc<LeaseTracker>,
}

impl DatabasePool {
    /// Validate the configuration and construct an uninitialized pool.
    /// No network connection is opened here.
    pub fn new(config: PoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            inner: OnceCell::new(),
            closed: AtomicBool::new(false),
            leases: Arc::new(LeaseTracker::new()),
        })
    }

    /// The configuration this pool was built from.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> PoolPhase {
        if self.closed.load(Ordering::Acquire) {
            PoolPhase::Closed
        } else if self.inner.initialized() {
            PoolPhase::Ready
        } else {
            PoolPhase::Uninitialized
        }
    }

    /// Open the pool and warm up `min_size` physical connections.
    ///
    /// Idempotent once `Ready`. On any establishment failure the partial
    /// pool is torn down and the pool stays `Uninitialized`, so the caller
    /// may retry. Bounded by the configured acquire timeout; fails rather
    /// than hangs when the server is unreachable.
    pub async fn initialize(&self) -> PoolResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        self.inner.get_or_try_init(|| self.open_pool()).await?;
        Ok(())
    }

    async fn open_pool(&self) -> PoolResult<PgPool> {
        info!(
            target = %self.config.redacted_dsn(),
            min_size = self.config.min_size,
            max_size = self.config.max_size,
            "initializing connection pool"
        );

        let pool = PgPoolOptions::new()
            .min_connections(self.config.min_size)
            .max_connections(self.config.max_size)
            .acquire_timeout(self.config.acquire_timeout)
            .idle_timeout(Some(self.config.max_idle_lifetime))
            .test_before_acquire(true)
            .connect_with(self.config.connect_options())
            .await
            .map_err(PoolError::init)?;

        // min_size connections must exist before the pool counts as Ready;
        // holding them all at once forces each one open.
        let warm = try_join_all((0..self.config.min_size).map(|_| pool.acquire())).await;
        match warm {
            Ok(connections) => drop(connections),
            Err(cause) => {
                pool.close().await;
                return Err(PoolError::init(cause));
            }
        }

        if self.closed.load(Ordering::Acquire) {
            // A close raced the initialization; tear down and report.
            pool.close().await;
            return Err(PoolError::Closed);
        }

        info!(size = pool.size(), "connection pool initialized");
        Ok(pool)
    }

    /// Acquire a connection, waiting up to the configured acquire timeout.
    ///
    /// Self-initializing: the first caller (or concurrent first callers)
    /// trigger exactly one initialization. Fails fast with
    /// `PoolError::Closed` after close, without blocking.
    pub async fn acquire(&self) -> PoolResult<LeasedConnection> {
        self.acquire_within(self.config.acquire_timeout).await
    }

    /// Acquire with a caller-specified wait bound.
    ///
    /// Cancelling the returned future does not leak a connection slot; a
    /// connection freed as the wait is abandoned goes back to the free set.
    pub async fn acquire_within(&self, wait: Duration) -> PoolResult<LeasedConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        let pool = self.inner.get_or_try_init(|| self.open_pool()).await?;

        let started = Instant::now();
        let conn = match tokio::time::timeout(wait, pool.acquire()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(cause)) => return Err(PoolError::from_acquire(cause, started.elapsed())),
            Err(_) => return Err(PoolError::Exhausted { waited: wait }),
        };

        Ok(LeasedConnection::new(conn, Arc::clone(&self.leases)))
    }

    /// Run a closure with a leased connection, releasing on every exit
    /// path.
    pub async fn with_connection<T, F>(&self, f: F) -> PoolResult<T>
    where
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, PoolResult<T>>,
    {
        let mut lease = self.acquire().await?;
        let result = f(lease.connection()?).await;
        lease.release().await?;
        result
    }

    /// Run a closure inside a transaction: commit on `Ok`, roll back on
    /// `Err`, and release the connection afterwards in both cases.
    pub async fn with_transaction<T, F>(&self, f: F) -> PoolResult<T>
    where
        F: for<'t> FnOnce(&'t mut PgConnection) -> BoxFuture<'t, PoolResult<T>>,
    {
        let mut lease = self.acquire().await?;
        let result = run_in_transaction(&mut lease, f).await;
        lease.release().await?;
        result
    }

    /// Liveness probe: a trivial round-trip query on a fresh lease.
    pub async fn ping(&self) -> PoolResult<()> {
        let mut lease = self.acquire().await?;
        let probe = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&mut *lease.connection()?)
            .await;
        match probe {
            Ok(_) => {
                lease.release().await?;
                debug!("liveness probe succeeded");
                Ok(())
            }
            Err(cause) => {
                lease.mark_broken();
                lease.release().await?;
                Err(PoolError::AcquisitionFailed { cause })
            }
        }
    }

    /// Snapshot of pool occupancy for operator logging.
    pub fn statistics(&self) -> PoolStatistics {
        let (connections, idle) = match self.inner.get() {
            Some(pool) => (pool.size(), pool.num_idle()),
            None => (0, 0),
        };
        PoolStatistics {
            connections,
            idle,
            leased: self.leases.active(),
            max_size: self.config.max_size,
        }
    }

    /// Close the pool: refuse new acquisitions, wait up to the drain
    /// timeout for outstanding leases, then close every physical
    /// connection.
    ///
    /// Idempotent. Never hangs: leases still out past the drain timeout are
    /// abandoned to close on release, and the underlying pool close gets a
    /// bounded grace period.
    pub async fn close(&self) -> PoolResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let Some(pool) = self.inner.get() else {
            info!("connection pool closed before initialization");
            return Ok(());
        };

        let deadline = Instant::now() + self.config.drain_timeout;
        while self.leases.active() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    leased = self.leases.active(),
                    "drain timeout elapsed, closing with connections still leased"
                );
                break;
            }
            let _ = tokio::time::timeout(remaining, self.leases.drained()).await;
        }

        let grace = deadline
            .saturating_duration_since(Instant::now())
            .max(Duration::from_secs(1));
        if tokio::time::timeout(grace, pool.close()).await.is_err() {
            warn!("pool close grace period elapsed, stragglers will close on release");
        }

        info!("connection pool closed");
        Ok(())
    }
}

impl std::fmt::Debug for DatabasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabasePool")
            .field("phase", &self.phase())
            .field("config", &self.config)
            .field("leased", &self.leases.active())
            .finish()
    }
}

async fn run_in_transaction<T, F>(lease: &mut LeasedConnection, f: F) -> PoolResult<T>
where
    F: for<'t> FnOnce(&'t mut PgConnection) -> BoxFuture<'t, PoolResult<T>>,
{
    let mut scope: TransactionScope<'_> = lease.begin_transaction().await?;
    match f(scope.connection()).await {
        Ok(value) => {
            scope.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = scope.rollback().await {
                warn!(error = %rollback, "rollback failed after transaction body error");
            }
            Err(err)
        }
    }
}

/// Occupancy counters at one instant.
#[derive(Debug, Clone)]
pub struct PoolStatistics {
    /// Live physical connections.
    pub connections: u32,
    /// Connections sitting in the free set.
    pub idle: usize,
    /// Outstanding leases.
    pub leased: usize,
    /// Configured ceiling.
    pub max_size: u32,
}

impl std::fmt::Display for PoolStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} connections ({} idle, {} leased)",
            self.connections, self.max_size, self.idle, self.leased
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    fn test_config() -> PoolConfig {
        PoolConfig::new("localhost", 5432, "app", "s3cret", "appdb")
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = test_config().with_size(8, 2);
        assert!(DatabasePool::new(config).is_err());
    }

    #[test]
    fn test_new_pool_is_uninitialized() {
        let pool = DatabasePool::new(test_config()).unwrap();
        assert_eq!(pool.phase(), PoolPhase::Uninitialized);
    }

    #[test]
    fn test_close_before_initialize() {
        tokio_test::block_on(async {
            let pool = DatabasePool::new(test_config()).unwrap();
            pool.close().await.unwrap();
            assert_eq!(pool.phase(), PoolPhase::Closed);
        });
    }

    #[test]
    fn test_close_is_idempotent() {
        tokio_test::block_on(async {
            let pool = DatabasePool::new(test_config()).unwrap();
            pool.close().await.unwrap();
            pool.close().await.unwrap();
            assert_eq!(pool.phase(), PoolPhase::Closed);
        });
    }

    #[tokio::test]
    async fn test_acquire_after_close_fails_fast() {
        let pool = DatabasePool::new(test_config()).unwrap();
        pool.close().await.unwrap();

        let started = Instant::now();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(PoolError::Closed)));
        // Fail-fast, not a blocked wait.
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_initialize_after_close_refused() {
        let pool = DatabasePool::new(test_config()).unwrap();
        pool.close().await.unwrap();
        assert!(matches!(pool.initialize().await, Err(PoolError::Closed)));
    }

    #[test]
    fn test_statistics_on_uninitialized_pool() {
        let pool = DatabasePool::new(test_config()).unwrap();
        let stats = pool.statistics();
        assert_eq!(stats.connections, 0);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.leased, 0);
        assert_eq!(stats.max_size, pool.config().max_size);
        assert_eq!(stats.to_string(), "0/10 connections (0 idle, 0 leased)");
    }

    #[test]
    fn test_debug_does_not_leak_password() {
        let pool = DatabasePool::new(test_config()).unwrap();
        let debug = format!("{:?}", pool);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("***"));
    }
}
