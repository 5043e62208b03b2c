//! `reconcile apply`: execute the plan against the live database.
//!
//! The whole run (introspect, plan, gate, execute, verify) happens under
//! the advisory lock so no second apply can interleave. The gate check runs
//! before any DDL: a plan with unacknowledged destructive operations exits
//! with code 3 and zero operations executed.
//!
//! Exit codes: 0 fully applied and verified, 2 partially applied or
//! verification failed, 3 destructive operations not acknowledged.

use super::{compute_plan, connect, ConnectionArgs};
use crate::report::{ApplyReport, PlanReport};
use anyhow::Result;
use clap::Args;
use reconcile_db::{apply, ExecutionOutcome, PgRunner, ReconcileDb, ReconcileLock};
use reconcile_schema::{check_acknowledgments, classify};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub conn: ConnectionArgs,

    /// Acknowledgment token for a destructive operation (repeatable)
    #[arg(long = "ack", value_name = "TOKEN")]
    pub acks: Vec<String>,

    /// Seconds to wait for the reconciliation lock before giving up
    #[arg(long, default_value = "3")]
    pub lock_timeout_secs: u64,
}

pub async fn run(args: ApplyArgs) -> Result<ExitCode> {
    let db = connect(&args.conn).await?;
    let lock =
        ReconcileLock::acquire(db.pool(), Duration::from_secs(args.lock_timeout_secs)).await?;

    let result = run_locked(&db, &args).await;

    if let Err(err) = lock.release().await {
        warn!("Failed to release reconciliation lock: {err}");
    }
    db.close().await;
    result
}

async fn run_locked(db: &ReconcileDb, args: &ApplyArgs) -> Result<ExitCode> {
    let plan = compute_plan(db, &args.conn).await?;

    if plan.is_reconciled() {
        let report = ApplyReport::already_reconciled(&args.conn.namespace);
        report.print(args.conn.json)?;
        return Ok(ExitCode::SUCCESS);
    }

    let classification = classify(&plan.operations);
    if let Err(err) = check_acknowledgments(&classification, &args.acks) {
        // The whole plan, safe operations included, is still reported;
        // nothing is executed.
        let report = PlanReport::from_plan(&args.conn.namespace, &plan);
        report.print(args.conn.json)?;
        eprintln!("{err}");
        return Ok(ExitCode::from(3));
    }

    info!(
        operations = plan.operations.len(),
        destructive = classification.destructive.len(),
        "Executing reconciliation plan"
    );

    let runner = PgRunner::new(db.pool().clone());
    let outcome = apply(&runner, &plan.operations).await;

    // Verification only means something when everything ran: re-introspect
    // and re-plan, and require the second plan to be empty.
    let verified = if outcome.fully_applied() {
        let recheck = compute_plan(db, &args.conn).await?;
        Some(recheck.is_reconciled())
    } else {
        None
    };

    let code = exit_code(&outcome, verified);
    let report = ApplyReport::new(&args.conn.namespace, &plan, outcome, verified);
    report.print(args.conn.json)?;

    Ok(ExitCode::from(code))
}

fn exit_code(outcome: &ExecutionOutcome, verified: Option<bool>) -> u8 {
    if outcome.fully_applied() && verified == Some(true) {
        0
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile_db::{OpStatus, OperationOutcome};
    use reconcile_schema::RiskLevel;

    fn outcome_with(statuses: &[OpStatus]) -> ExecutionOutcome {
        ExecutionOutcome {
            outcomes: statuses
                .iter()
                .enumerate()
                .map(|(id, status)| OperationOutcome {
                    id,
                    summary: format!("op {id}"),
                    risk: RiskLevel::Additive,
                    status: *status,
                    message: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_exit_code_success() {
        let outcome = outcome_with(&[OpStatus::Applied, OpStatus::Applied]);
        assert_eq!(exit_code(&outcome, Some(true)), 0);
    }

    #[test]
    fn test_exit_code_partial_application() {
        let outcome = outcome_with(&[OpStatus::Applied, OpStatus::Failed, OpStatus::Skipped]);
        assert_eq!(exit_code(&outcome, None), 2);
    }

    #[test]
    fn test_exit_code_verification_failure() {
        // Everything applied but the re-plan still found differences.
        let outcome = outcome_with(&[OpStatus::Applied]);
        assert_eq!(exit_code(&outcome, Some(false)), 2);
    }
}
