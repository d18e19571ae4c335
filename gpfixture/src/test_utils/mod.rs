//! In-memory doubles for the SQL and command seams.
//!
//! Fixture operations are exercised against scripted responses so that their
//! statement sequencing, retries and polling can be tested without a cluster.
pub mod command;
pub mod database;

use std::path::PathBuf;

use gpfixture_config::shared::{HarnessConfig, PgConnectionConfig, PollConfig, TlsConfig};

use crate::harness::Harness;
use crate::test_utils::command::RecordingCommandRunner;
use crate::test_utils::database::ScriptedSqlClient;

/// Harness wired to scripted doubles.
pub type TestHarness = Harness<ScriptedSqlClient, RecordingCommandRunner>;

/// Configuration of a local single-host cluster with fast polling.
pub fn test_config() -> HarnessConfig {
    let connection = PgConnectionConfig {
        host: "localhost".to_owned(),
        port: 15432,
        name: "template1".to_owned(),
        username: "gpadmin".to_owned(),
        password: None,
        tls: TlsConfig::default(),
    };

    let mut config = HarnessConfig::new(connection, PathBuf::from("/data/master/gpseg-1"));
    config.database_retry = PollConfig {
        interval_ms: 10,
        max_attempts: 10,
    };

    config
}

/// Builds a [`TestHarness`] and returns handles to its doubles.
pub fn test_harness(config: HarnessConfig) -> (TestHarness, ScriptedSqlClient, RecordingCommandRunner) {
    let client = ScriptedSqlClient::new();
    let runner = RecordingCommandRunner::new();
    let harness = Harness::new(config, client.clone(), runner.clone());

    (harness, client, runner)
}
