//! Plan execution.
//!
//! Runs an ordered plan against the target database. Transactional
//! operations run each in their own transaction; the handful of statements
//! Postgres refuses inside a transaction block (`ALTER TYPE ... ADD VALUE`,
//! `CREATE INDEX CONCURRENTLY`) run autocommit.
//!
//! There is no rollback of earlier operations. DDL that already committed
//! stays committed; a failure marks the failing operation and skips the
//! rest, and the run reports partial application.
//!
//! [`DdlRunner`] is the seam between the policy (ordering, skip-on-failure,
//! outcome accounting) and the wire: production uses [`PgRunner`], tests
//! use an in-memory runner.

use crate::error::{DbError, Result};
use async_trait::async_trait;
use reconcile_schema::{PlannedOperation, RiskLevel};
use serde::Serialize;
use sqlx::postgres::PgPool;
use tracing::{error, info};

/// Executes DDL statements against one database.
#[async_trait]
pub trait DdlRunner: Send + Sync {
    /// Run a single statement in autocommit mode.
    async fn run(&self, sql: &str) -> Result<()>;

    /// Run a group of statements in one transaction.
    async fn run_in_transaction(&self, statements: &[String]) -> Result<()>;
}

/// [`DdlRunner`] backed by a live Postgres pool.
pub struct PgRunner {
    pool: PgPool,
}

impl PgRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn execution_error(sql: &str, err: sqlx::Error) -> DbError {
    DbError::Execution {
        operation: sql.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl DdlRunner for PgRunner {
    async fn run(&self, sql: &str) -> Result<()> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| execution_error(sql, e))
    }

    async fn run_in_transaction(&self, statements: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for sql in statements {
            sqlx::query(sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| execution_error(sql, e))?;
        }
        tx.commit().await?;
        Ok(())
    }
}

/// Terminal state of one operation within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Applied,
    Failed,
    Skipped,
}

/// Per-operation record in the execution report.
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    pub id: usize,
    pub summary: String,
    pub risk: RiskLevel,
    pub status: OpStatus,
    /// Error text for failed operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of running a whole plan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionOutcome {
    pub outcomes: Vec<OperationOutcome>,
}

impl ExecutionOutcome {
    pub fn applied(&self) -> usize {
        self.count(OpStatus::Applied)
    }

    pub fn failed(&self) -> usize {
        self.count(OpStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(OpStatus::Skipped)
    }

    /// True when every operation in the plan was applied.
    pub fn fully_applied(&self) -> bool {
        self.outcomes.iter().all(|o| o.status == OpStatus::Applied)
    }

    fn count(&self, status: OpStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Apply an ordered plan.
///
/// Operations run strictly in the given order. On the first failure the
/// remaining operations are recorded as skipped, since their dependencies
/// can no longer be trusted to exist.
pub async fn apply(runner: &dyn DdlRunner, operations: &[PlannedOperation]) -> ExecutionOutcome {
    let mut outcome = ExecutionOutcome::default();
    let mut failed = false;

    for planned in operations {
        if failed {
            outcome.outcomes.push(OperationOutcome {
                id: planned.id,
                summary: planned.summary(),
                risk: planned.risk,
                status: OpStatus::Skipped,
                message: None,
            });
            continue;
        }

        let statements = planned.op.to_sql();
        let result = if planned.op.is_transactional() {
            runner.run_in_transaction(&statements).await
        } else {
            run_autocommit(runner, &statements).await
        };

        match result {
            Ok(()) => {
                info!(id = planned.id, op = %planned.summary(), "Applied");
                outcome.outcomes.push(OperationOutcome {
                    id: planned.id,
                    summary: planned.summary(),
                    risk: planned.risk,
                    status: OpStatus::Applied,
                    message: None,
                });
            }
            Err(err) => {
                error!(id = planned.id, op = %planned.summary(), %err, "Operation failed");
                failed = true;
                outcome.outcomes.push(OperationOutcome {
                    id: planned.id,
                    summary: planned.summary(),
                    risk: planned.risk,
                    status: OpStatus::Failed,
                    message: Some(err.to_string()),
                });
            }
        }
    }

    outcome
}

async fn run_autocommit(runner: &dyn DdlRunner, statements: &[String]) -> Result<()> {
    for sql in statements {
        runner.run(sql).await?;
    }
    Ok(())
}
