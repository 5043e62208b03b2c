//! Subcommand implementations.

pub mod apply;
pub mod plan;
pub mod verify;

use anyhow::{Context, Result};
use clap::Args;
use reconcile_db::{introspect, ReconcileDb};
use reconcile_schema::{load_dir, DesiredState, Plan};
use std::path::{Path, PathBuf};

/// Connection and input options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Schema (namespace) to reconcile
    #[arg(long, default_value = "public")]
    pub namespace: String,

    /// Directory of versioned definition units (*.json)
    #[arg(long, default_value = "schema")]
    pub schema_dir: PathBuf,

    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn connect(args: &ConnectionArgs) -> Result<ReconcileDb> {
    ReconcileDb::connect(&args.database_url)
        .await
        .context("connecting to target database")
}

pub fn load_desired(schema_dir: &Path, namespace: &str) -> Result<DesiredState> {
    load_dir(schema_dir, namespace).with_context(|| {
        format!("loading definition units from {}", schema_dir.display())
    })
}

/// Introspect the live schema and diff it against the definition units.
pub async fn compute_plan(db: &ReconcileDb, args: &ConnectionArgs) -> Result<Plan> {
    let desired = load_desired(&args.schema_dir, &args.namespace)?;
    let current = introspect(db.pool(), &args.namespace).await?;
    let plan = reconcile_schema::plan(&current, &desired)?;
    Ok(plan)
}
