use gpfixture::harness::Harness;
use gpfixture::sync::SyncEndpoint;
use gpfixture_config::shared::{HarnessConfig, PgConnectionConfig, PollConfig};
use tracing::{debug, info};

use crate::{EndpointArgs, FixtureCommand};

/// Connects to the configured cluster and runs `command` against it.
pub async fn run_with_config(config: HarnessConfig, command: FixtureCommand) -> anyhow::Result<()> {
    info!("starting fixture command");

    log_config(&config);

    let harness = Harness::connect(config);

    match command {
        FixtureCommand::WaitInsync(args) => {
            let endpoint = resolve_endpoint(args, harness.sync_endpoint());
            harness.wait_till_insync_transition(&endpoint).await?;
        }
        FixtureCommand::WaitResync(args) => {
            let endpoint = resolve_endpoint(args, harness.sync_endpoint());
            harness.wait_till_resync_transition(&endpoint).await?;
        }
        FixtureCommand::WaitChangeTracking(args) => {
            let endpoint = resolve_endpoint(args, harness.sync_endpoint());
            let segments = harness
                .wait_till_change_tracking_transition(&endpoint)
                .await?;
            info!(segments, "segments in change tracking");
        }
        FixtureCommand::BackupDb { dbname } => {
            harness.backup_db_data(&dbname).await?;
            harness.get_distribution_policy(&dbname).await?;
        }
        FixtureCommand::ValidateDb {
            dbname,
            expected_tables,
        } => {
            harness.validate_db_data(&dbname, expected_tables).await?;
            harness.validate_distribution_policy(&dbname).await?;
        }
        FixtureCommand::Segments => {
            let layout = harness.segments().await?;
            println!("dbid\tcontent\trole\tpreferred\tmode\tstatus\tport\thostname\taddress");
            for segment in layout.segments() {
                println!(
                    "{}\t{}\t{:?}\t{:?}\t{:?}\t{:?}\t{}\t{}\t{}",
                    segment.dbid,
                    segment.content,
                    segment.role,
                    segment.preferred_role,
                    segment.mode,
                    segment.status,
                    segment.port,
                    segment.hostname,
                    segment.address
                );
            }
        }
    }

    info!("fixture command completed");

    Ok(())
}

fn resolve_endpoint(args: EndpointArgs, default: SyncEndpoint) -> SyncEndpoint {
    SyncEndpoint {
        host: args.host.unwrap_or(default.host),
        port: args.port.unwrap_or(default.port),
        user: args.user.unwrap_or(default.user),
    }
}

fn log_config(config: &HarnessConfig) {
    debug!(
        master_data_directory = %config.master_data_directory.display(),
        gphome = %config.gphome.display(),
        data_dir = %config.data_dir.display(),
        gppkg = config.gppkg.is_some(),
        transfer_source = config.transfer_source.is_some(),
        "harness config"
    );
    log_pg_connection_config(&config.connection);
    log_poll_config("transition_poll", &config.transition_poll);
    log_poll_config("database_retry", &config.database_retry);
}

fn log_pg_connection_config(config: &PgConnectionConfig) {
    debug!(
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        tls_enabled = config.tls.enabled,
        "master connection config",
    );
}

fn log_poll_config(name: &str, config: &PollConfig) {
    debug!(
        policy = name,
        interval_ms = config.interval_ms,
        max_attempts = config.max_attempts,
        "poll config"
    );
}
