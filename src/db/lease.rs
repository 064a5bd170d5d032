//! Connection leases and transaction scopes.
//!
//! A [`LeasedConnection`] represents exclusive, temporary ownership of one
//! physical connection by one logical caller. Release is guaranteed on
//! every exit path: explicitly via [`LeasedConnection::release`], or by the
//! guard's `Drop`. A lease can be promoted into a [`TransactionScope`],
//! which commits on normal completion and rolls back on error paths,
//! including plain drop.

use sqlx::pool::PoolConnection;
use sqlx::{Acquire, PgConnection, Postgres, Transaction};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{PoolError, PoolResult};

/// Shared accounting of outstanding leases, used by the pool to drain on
/// close.
#[derive(Debug, Default)]
pub(crate) struct LeaseTracker {
    active: AtomicUsize,
    notify: Notify,
}

impl LeaseTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lease(&self) {
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    /// Balance one lease. Saturates at zero; an underflow attempt means a
    /// release was double-counted and is logged rather than wrapped.
    pub(crate) fn unlease(&self) {
        let result = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            });
        match result {
            Ok(0) => warn!("lease count underflow detected"),
            Ok(1) => self.notify.notify_waiters(),
            _ => {}
        }
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Wait for a release notification. A notification can land between a
    /// caller's count check and this wait, so callers must poll with a
    /// bounded timeout and re-check [`active`](Self::active) after waking.
    pub(crate) async fn drained(&self) {
        self.notify.notified().await;
    }
}

/// Exclusive handle on one pooled connection.
pub struct LeasedConnection {
    conn: Option<PoolConnection<Postgres>>,
    broken: bool,
    in_transaction: Arc<AtomicBool>,
    tracker: Arc<LeaseTracker>,
    id: Uuid,
}

impl LeasedConnection {
    pub(crate) fn new(conn: PoolConnection<Postgres>, tracker: Arc<LeaseTracker>) -> Self {
        tracker.lease();
        let id = Uuid::new_v4();
        debug!(lease_id = %id, "connection leased");
        Self {
            conn: Some(conn),
            broken: false,
            in_transaction: Arc::new(AtomicBool::new(false)),
            tracker,
            id,
        }
    }

    /// Lease identifier, for correlating log lines.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Access the underlying connection for executing statements.
    pub fn connection(&mut self) -> PoolResult<&mut PgConnection> {
        match self.conn.as_mut() {
            Some(conn) => Ok(&mut *conn),
            None => Err(PoolError::DoubleRelease),
        }
    }

    /// Flag the connection as fatally errored. On release it is discarded
    /// instead of returned, and the pool opens a replacement lazily.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Start a transaction bound to this lease.
    ///
    /// Refused while a previous scope on this handle is still live
    /// (`PoolError::NestedTransaction`); a single connection serializes its
    /// own statements and savepoint nesting is not part of this layer.
    pub async fn begin_transaction(&mut self) -> PoolResult<TransactionScope<'_>> {
        if self.in_transaction.load(Ordering::Acquire) {
            return Err(PoolError::NestedTransaction);
        }
        let flag = Arc::clone(&self.in_transaction);
        let lease_id = self.id;
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => return Err(PoolError::DoubleRelease),
        };
        let tx = conn
            .begin()
            .await
            .map_err(|cause| PoolError::transaction("begin", cause))?;
        flag.store(true, Ordering::Release);
        debug!(lease_id = %lease_id, "transaction started");
        Ok(TransactionScope {
            tx: Some(tx),
            in_transaction: flag,
            lease_id,
        })
    }

    /// Return the connection to the pool's free set.
    ///
    /// A second release on the same handle is a programming error and is
    /// reported as `PoolError::DoubleRelease`.
    pub async fn release(&mut self) -> PoolResult<()> {
        let Some(conn) = self.conn.take() else {
            warn!(lease_id = %self.id, "double release");
            return Err(PoolError::DoubleRelease);
        };
        self.discard_or_return(conn);
        self.tracker.unlease();
        Ok(())
    }

    fn discard_or_return(&self, conn: PoolConnection<Postgres>) {
        if self.broken {
            // Detaching removes the connection from the pool before it is
            // closed, so a broken socket is never handed to another caller.
            drop(conn.detach());
            debug!(lease_id = %self.id, "broken connection discarded");
        } else {
            drop(conn);
            debug!(lease_id = %self.id, "connection released");
        }
    }
}

impl Drop for LeasedConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.discard_or_return(conn);
            self.tracker.unlease();
        }
    }
}

impl std::fmt::Debug for LeasedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeasedConnection")
            .field("id", &self.id)
            .field("released", &self.conn.is_none())
            .field("broken", &self.broken)
            .field("in_transaction", &self.in_transaction.load(Ordering::Relaxed))
            .finish()
    }
}

/// A transaction bound to one leased connection.
///
/// Consuming the scope with [`commit`](Self::commit) makes the writes
/// visible; [`rollback`](Self::rollback) or a plain drop undoes them (the
/// inner sqlx transaction queues a rollback on the connection when dropped
/// unfinished). The lease outlives the scope and is released separately,
/// exactly once.
pub struct TransactionScope<'c> {
    tx: Option<Transaction<'c, Postgres>>,
    in_transaction: Arc<AtomicBool>,
    lease_id: Uuid,
}

impl TransactionScope<'_> {
    /// Access the connection for executing statements inside the
    /// transaction.
    pub fn connection(&mut self) -> &mut PgConnection {
        // tx is Some until commit/rollback, both of which consume self
        self.tx
            .as_deref_mut()
            .expect("transaction scope already completed")
    }

    /// Commit the transaction.
    pub async fn commit(mut self) -> PoolResult<()> {
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        self.in_transaction.store(false, Ordering::Release);
        tx.commit()
            .await
            .map_err(|cause| PoolError::transaction("commit", cause))?;
        debug!(lease_id = %self.lease_id, "transaction committed");
        Ok(())
    }

    /// Roll the transaction back explicitly.
    pub async fn rollback(mut self) -> PoolResult<()> {
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        self.in_transaction.store(false, Ordering::Release);
        tx.rollback()
            .await
            .map_err(|cause| PoolError::transaction("rollback", cause))?;
        debug!(lease_id = %self.lease_id, "transaction rolled back");
        Ok(())
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.in_transaction.store(false, Ordering::Release);
            debug!(lease_id = %self.lease_id, "transaction scope dropped, rolling back");
        }
    }
}

impl std::fmt::Debug for TransactionScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("lease_id", &self.lease_id)
            .field("completed", &self.tx.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_counts_leases() {
        let tracker = LeaseTracker::new();
        assert_eq!(tracker.active(), 0);
        tracker.lease();
        tracker.lease();
        assert_eq!(tracker.active(), 2);
        tracker.unlease();
        assert_eq!(tracker.active(), 1);
        tracker.unlease();
        assert_eq!(tracker.active(), 0);
    }

    #[test]
    fn test_tracker_saturates_at_zero() {
        let tracker = LeaseTracker::new();
        tracker.unlease();
        assert_eq!(tracker.active(), 0);
    }

    #[tokio::test]
    async fn test_tracker_notifies_on_drain() {
        let tracker = Arc::new(LeaseTracker::new());
        tracker.lease();

        let waiter = Arc::clone(&tracker);
        let handle = tokio::spawn(async move {
            while waiter.active() > 0 {
                let _ = tokio::time::timeout(
                    std::time::Duration::from_millis(20),
                    waiter.drained(),
                )
                .await;
            }
        });

        tracker.unlease();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("drain wait timed out")
            .expect("drain task panicked");
    }
}
