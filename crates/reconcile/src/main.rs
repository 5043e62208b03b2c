//! Schema reconciliation CLI.
//!
//! Three subcommands over the same pipeline:
//! - `plan`    introspect, diff, print what would change (read-only)
//! - `apply`   take the lock, execute the plan, verify
//! - `verify`  introspect, diff, report whether anything is pending
//!
//! Reports go to stdout; logs go to stderr so JSON output stays parseable.

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
mod report;

#[derive(Parser, Debug)]
#[command(
    name = "reconcile",
    about = "Reconcile a live Postgres schema to its declared desired state",
    version
)]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute and print the reconciliation plan without executing anything
    Plan(cli::plan::PlanArgs),

    /// Execute the reconciliation plan against the live database
    Apply(cli::apply::ApplyArgs),

    /// Check whether the live schema matches the desired state
    Verify(cli::verify::VerifyArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "reconcile=debug,reconcile_db=debug,reconcile_schema=debug"
    } else {
        "reconcile=info,reconcile_db=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Plan(args) => cli::plan::run(args).await,
        Commands::Apply(args) => cli::apply::run(args).await,
        Commands::Verify(args) => cli::verify::run(args).await,
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::from(1)
        }
    }
}
