//! Postgres layer for the schema reconciliation engine.
//!
//! This crate owns everything that touches a live database: the connection
//! pool, the per-run advisory lock, catalog introspection, and operation
//! execution. The pure half (model, loader, planner, gate) lives in
//! `reconcile_schema` and never sees a connection.
//!
//! # Usage
//!
//! ```rust,ignore
//! use reconcile_db::{ReconcileDb, ReconcileLock, introspect};
//!
//! let db = ReconcileDb::connect(&database_url).await?;
//! let _lock = ReconcileLock::acquire(db.pool(), Duration::from_secs(3)).await?;
//! let current = introspect(db.pool(), "public").await?;
//! ```

mod error;
pub mod execute;
pub mod introspect;
pub mod lock;

pub use error::{DbError, Result};
pub use execute::{apply, DdlRunner, ExecutionOutcome, OperationOutcome, OpStatus, PgRunner};
pub use introspect::introspect;
pub use lock::ReconcileLock;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

/// Connection handle for one target database.
///
/// A concrete `PgPool`, never `AnyPool`: catalog queries and DDL quirks here
/// are Postgres-specific and the concrete type keeps row decoding full-
/// featured.
#[derive(Clone)]
pub struct ReconcileDb {
    pool: PgPool,
}

impl ReconcileDb {
    /// Connect to the target database.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        info!("Connected to target database");
        Ok(Self { pool })
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the connection pool.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
