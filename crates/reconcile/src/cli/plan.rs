//! `reconcile plan`: read-only diff of live vs desired.

use super::{compute_plan, connect, ConnectionArgs};
use crate::report::PlanReport;
use anyhow::Result;
use clap::Args;
use std::process::ExitCode;

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub conn: ConnectionArgs,
}

/// Exit 0 when the schema is already reconciled, 1 when anything is pending.
pub async fn run(args: PlanArgs) -> Result<ExitCode> {
    let db = connect(&args.conn).await?;
    let plan = compute_plan(&db, &args.conn).await?;
    db.close().await;

    let report = PlanReport::from_plan(&args.conn.namespace, &plan);
    report.print(args.conn.json)?;

    Ok(if plan.is_reconciled() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
