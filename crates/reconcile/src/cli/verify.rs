//! `reconcile verify`: report whether the live schema matches the
//! definition units. Same diff as `plan`, phrased as a pass/fail check for
//! CI and deploy gates.

use super::{compute_plan, connect, ConnectionArgs};
use crate::report::VerifyReport;
use anyhow::Result;
use clap::Args;
use std::process::ExitCode;

#[derive(Args, Debug)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub conn: ConnectionArgs,
}

/// Exit 0 when reconciled, 1 when differences remain.
pub async fn run(args: VerifyArgs) -> Result<ExitCode> {
    let db = connect(&args.conn).await?;
    let plan = compute_plan(&db, &args.conn).await?;
    db.close().await;

    let report = VerifyReport::from_plan(&args.conn.namespace, &plan);
    report.print(args.conn.json)?;

    Ok(if plan.is_reconciled() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
