use clap::{Args, Parser, Subcommand};
use gpfixture_config::shared::HarnessConfig;
use gpfixture_telemetry::tracing::{init_tracing, set_global_scenario};
use tracing::error;

use crate::config::load_harness_config;
use crate::core::run_with_config;

mod config;
mod core;

/// Drives Greenplum test fixtures from the shell.
#[derive(Debug, Parser)]
#[command(name = "gpfixture", version, about, arg_required_else_help = true)]
struct AppArgs {
    #[command(subcommand)]
    command: FixtureCommand,
}

#[derive(Debug, Subcommand)]
pub enum FixtureCommand {
    /// Wait until every segment is synchronized and up
    WaitInsync(EndpointArgs),
    /// Wait until every segment out of sync is resynchronizing
    WaitResync(EndpointArgs),
    /// Wait until at least one segment is in change tracking
    WaitChangeTracking(EndpointArgs),
    /// Dump every user table of a database into the data directory
    BackupDb {
        #[arg(long)]
        dbname: String,
    },
    /// Compare every user table of a database with its backup dump
    ValidateDb {
        #[arg(long)]
        dbname: String,
        /// Number of user tables the restored database must hold
        #[arg(long)]
        expected_tables: usize,
    },
    /// Print the segment layout
    Segments,
}

impl FixtureCommand {
    /// Subcommand name, tagged onto every log line as the scenario.
    fn name(&self) -> &'static str {
        match self {
            FixtureCommand::WaitInsync(_) => "wait-insync",
            FixtureCommand::WaitResync(_) => "wait-resync",
            FixtureCommand::WaitChangeTracking(_) => "wait-change-tracking",
            FixtureCommand::BackupDb { .. } => "backup-db",
            FixtureCommand::ValidateDb { .. } => "validate-db",
            FixtureCommand::Segments => "segments",
        }
    }
}

/// Server the transition is observed from; unset values come from the
/// configured master connection.
#[derive(Debug, Args)]
pub struct EndpointArgs {
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub user: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = AppArgs::parse();

    let harness_config = load_harness_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;
    set_global_scenario(args.command.name());

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(harness_config, args.command))?;

    Ok(())
}

async fn async_main(harness_config: HarnessConfig, command: FixtureCommand) -> anyhow::Result<()> {
    if let Err(err) = run_with_config(harness_config, command).await {
        error!("fixture command failed: {err}");

        return Err(err);
    }

    Ok(())
}
