//! Per-run advisory locking.
//!
//! Concurrent reconciliations against the same database would interleave
//! DDL and fight over catalog locks. A session-scoped Postgres advisory
//! lock serializes whole runs: the lock is taken before introspection and
//! held through execution and verification.
//!
//! Waiting is bounded. A second invocation fails fast with
//! [`DbError::LockHeld`] instead of blocking behind a long-running apply.

use crate::error::{DbError, Result};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Row};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fixed advisory lock key for schema reconciliation runs.
///
/// Arbitrary but stable: every version of the tool must agree on it for the
/// mutual exclusion to hold.
pub const RECONCILE_LOCK_KEY: i64 = 0x5265_636F_6E63;

const RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// A guard holding the reconciliation advisory lock.
///
/// The lock is session-scoped, so it lives on a dedicated connection checked
/// out of the pool for the duration of the run. Prefer calling
/// [`ReconcileLock::release`]; if the guard is dropped instead, the held
/// connection is detached from the pool and closed, which releases the lock
/// server-side.
pub struct ReconcileLock {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

impl ReconcileLock {
    /// Acquire the advisory lock, waiting up to `timeout`.
    ///
    /// Polls `pg_try_advisory_lock` every 250ms rather than blocking in
    /// `pg_advisory_lock`, so the wait is bounded and the failure mode is an
    /// explicit error, not an indefinite hang.
    pub async fn acquire(pool: &PgPool, timeout: Duration) -> Result<Self> {
        let mut conn = pool.acquire().await?;
        let started = Instant::now();

        loop {
            let row = sqlx::query("SELECT pg_try_advisory_lock($1)")
                .bind(RECONCILE_LOCK_KEY)
                .fetch_one(&mut *conn)
                .await?;
            let acquired: bool = row.try_get(0)?;

            if acquired {
                info!(key = RECONCILE_LOCK_KEY, "Acquired reconciliation lock");
                return Ok(Self {
                    conn: Some(conn),
                    key: RECONCILE_LOCK_KEY,
                });
            }

            if started.elapsed() >= timeout {
                debug!("Reconciliation lock still held elsewhere, giving up");
                return Err(DbError::LockHeld {
                    key: RECONCILE_LOCK_KEY,
                    waited_ms: started.elapsed().as_millis(),
                });
            }

            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Release the lock and return the connection to the pool.
    pub async fn release(mut self) -> Result<()> {
        if let Some(mut conn) = self.conn.take() {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(self.key)
                .execute(&mut *conn)
                .await?;
            debug!(key = self.key, "Released reconciliation lock");
        }
        Ok(())
    }
}

impl Drop for ReconcileLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Returning the connection to the pool would keep the session
            // lock held by an idle pooled connection. Detach and close it so
            // the server releases the lock.
            warn!(
                key = self.key,
                "Reconciliation lock dropped without release(); closing its connection"
            );
            drop(conn.detach());
        }
    }
}

impl std::fmt::Debug for ReconcileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileLock").field("key", &self.key).finish()
    }
}
