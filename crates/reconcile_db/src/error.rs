//! Error types for the database layer.

use thiserror::Error;

/// Database operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// The system catalogs could not be enumerated (usually insufficient
    /// privilege). Fatal: the run aborts before planning.
    #[error("Introspection failed: {0}")]
    Introspection(String),

    /// Another reconciliation holds the advisory lock. Fatal, nothing was
    /// touched.
    #[error(
        "Another reconciliation is already running against this database \
         (advisory lock {key} still held after {waited_ms}ms)"
    )]
    LockHeld { key: i64, waited_ms: u128 },

    /// A DDL statement failed during execution. Recorded per operation in
    /// the run outcome; remaining operations are skipped, applied ones stay
    /// applied.
    #[error("Execution failed: {operation}: {message}")]
    Execution { operation: String, message: String },
}

impl DbError {
    /// Create an introspection error.
    pub fn introspection(msg: impl Into<String>) -> Self {
        Self::Introspection(msg.into())
    }
}
