//! Entry point bundling the configuration with the SQL and command seams.
//!
//! Operations live in the modules that add `impl` blocks to [`Harness`].

use gpfixture_config::shared::HarnessConfig;
use tracing::warn;

use crate::command::{CommandOutput, CommandRunner, CommandSpec, ShellCommandRunner, run_checked};
use crate::context::{CommandOutcome, ScenarioContext};
use crate::database::{PgSqlClient, SqlClient};
use crate::error::{ErrorKind, FixtureResult};
use crate::fixture_error;

/// Runs fixture operations against one cluster.
#[derive(Debug, Clone)]
pub struct Harness<C, R> {
    config: HarnessConfig,
    client: C,
    runner: R,
}

impl Harness<PgSqlClient, ShellCommandRunner> {
    /// Creates a harness talking to the configured master.
    pub fn connect(config: HarnessConfig) -> Self {
        let client = PgSqlClient::new(config.connection.clone());

        Self::new(config, client, ShellCommandRunner::new())
    }
}

impl<C, R> Harness<C, R>
where
    C: SqlClient,
    R: CommandRunner,
{
    pub fn new(config: HarnessConfig, client: C, runner: R) -> Self {
        Self {
            config,
            client,
            runner,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Builds a local command carrying the connection environment so that
    /// `psql` and the gp utilities reach the configured cluster.
    pub(crate) fn local(&self, name: impl Into<String>, cmd: impl Into<String>) -> CommandSpec {
        let connection = &self.config.connection;

        let mut spec = CommandSpec::local(name, cmd)
            .with_env("PGHOST", connection.host.clone())
            .with_env("PGPORT", connection.port.to_string())
            .with_env("PGUSER", connection.username.clone())
            .with_env(
                "MASTER_DATA_DIRECTORY",
                self.config.master_data_directory.to_string_lossy(),
            );
        if !self.config.gphome.as_os_str().is_empty() {
            spec = spec.with_env("GPHOME", self.config.gphome.to_string_lossy());
        }

        spec
    }

    /// Runs `spec`, capturing a non-zero exit in the outcome instead of failing.
    pub(crate) async fn run_spec(&self, spec: &CommandSpec) -> FixtureResult<CommandOutcome> {
        let output = self.runner.run(spec).await?;

        let failure = (!output.succeeded()).then(|| {
            fixture_error!(
                ErrorKind::CommandFailed,
                "Command exited with a non-zero status",
                format!(
                    "{}: '{}' rc={} stderr={}",
                    spec.name,
                    spec.cmd_str,
                    output.rc,
                    output.stderr.trim()
                )
            )
        });

        Ok(CommandOutcome { output, failure })
    }

    /// Runs `spec` and fails on a non-zero exit.
    pub(crate) async fn run_spec_checked(&self, spec: &CommandSpec) -> FixtureResult<CommandOutput> {
        run_checked(&self.runner, spec).await
    }

    /// Runs a local shell command. A non-zero exit is reported through the
    /// returned outcome, `Err` means the command could not be started.
    pub async fn run_command(&self, cmd: &str) -> FixtureResult<CommandOutcome> {
        let spec = self.local(format!("run {cmd}"), cmd);

        self.run_spec(&spec).await
    }

    /// Runs a local shell command and returns its output, logging failures.
    pub async fn run_cmd(&self, cmd: &str) -> FixtureResult<CommandOutput> {
        let outcome = self.run_command(cmd).await?;
        if let Some(failure) = &outcome.failure {
            warn!(cmd, "caught exception {failure}");
        }

        Ok(outcome.output)
    }

    /// Runs a cluster utility from `$GPHOME/bin`, e.g. `gpstart -a`. Without
    /// a configured `gphome` the utility is looked up on `PATH`.
    pub async fn run_gpcommand(&self, cmd: &str) -> FixtureResult<CommandOutcome> {
        let cmd_str = if self.config.gphome.as_os_str().is_empty() {
            cmd.to_owned()
        } else {
            self.config.gp_binary(cmd).to_string_lossy().into_owned()
        };
        let spec = self.local(format!("run {cmd}"), cmd_str);

        self.run_spec(&spec).await
    }

    /// Runs a local shell command and records its outcome on `context` for
    /// later `check_*` steps.
    pub async fn run_command_in(
        &self,
        cmd: &str,
        context: &mut ScenarioContext,
    ) -> FixtureResult<()> {
        let outcome = self.run_command(cmd).await?;
        context.record(outcome);

        Ok(())
    }

    /// Like [`Harness::run_gpcommand`], recording the outcome on `context`.
    pub async fn run_gpcommand_in(
        &self,
        cmd: &str,
        context: &mut ScenarioContext,
    ) -> FixtureResult<()> {
        let outcome = self.run_gpcommand(cmd).await?;
        context.record(outcome);

        Ok(())
    }

    /// Runs `cmd` on `host` through `gpssh` after sourcing `source_file` and
    /// evaluating `export_mdd`.
    pub async fn run_command_remote(
        &self,
        cmd: &str,
        host: &str,
        source_file: &str,
        export_mdd: &str,
    ) -> FixtureResult<CommandOutcome> {
        let cmd_str = format!("gpssh -h {host} -e 'source {source_file}; {export_mdd}; {cmd}'");
        let spec = self.local(format!("run command {cmd}"), cmd_str);

        let output = self.run_spec_checked(&spec).await?;

        Ok(CommandOutcome {
            output,
            failure: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::test_utils::command::RecordingCommandRunner;
    use crate::test_utils::{TestHarness, test_config, test_harness};

    fn harness() -> (TestHarness, RecordingCommandRunner) {
        let mut config = test_config();
        config.gphome = PathBuf::from("/usr/local/gpdb");
        let (harness, _, runner) = test_harness(config);
        (harness, runner)
    }

    #[tokio::test]
    async fn gpcommand_resolves_under_gphome() {
        let (harness, runner) = harness();

        let outcome = harness.run_gpcommand("gpstart -a").await.unwrap();

        assert!(outcome.failure.is_none());
        let calls = runner.calls().await;
        assert_eq!(calls[0].cmd_str, "/usr/local/gpdb/bin/gpstart -a");
        assert!(calls[0]
            .env
            .contains(&("GPHOME".to_owned(), "/usr/local/gpdb".to_owned())));
    }

    #[tokio::test]
    async fn non_zero_exit_is_captured_not_raised() {
        let (harness, runner) = harness();
        runner
            .respond("createdb", 1, "", "database \"testdb\" already exists")
            .await;

        let outcome = harness.run_command("createdb testdb").await.unwrap();

        assert_eq!(outcome.output.rc, 1);
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.kind(), ErrorKind::CommandFailed);
        assert!(failure.detail().unwrap().contains("already exists"));
    }

    #[tokio::test]
    async fn recorded_command_is_checked_by_later_steps() {
        let (harness, runner) = harness();
        runner
            .respond("gpstate", 0, "Mirror Segment Status: in sync\n", "")
            .await;
        runner
            .respond("createdb", 1, "", "database \"testdb\" already exists")
            .await;
        let mut context = ScenarioContext::new();

        harness
            .run_gpcommand_in("gpstate -m", &mut context)
            .await
            .unwrap();

        context.check_return_code(0).unwrap();
        context.check_stdout_msg("in sync").unwrap();
        assert!(!context.has_exception());

        harness
            .run_command_in("createdb testdb", &mut context)
            .await
            .unwrap();

        context.check_return_code(1).unwrap();
        context.check_err_msg("already exists").unwrap();
        assert!(context.check_stdout_msg("in sync").is_err());
        let failure = context.take_exception().unwrap();
        assert_eq!(failure.kind(), ErrorKind::CommandFailed);
        assert!(!context.has_exception());
    }

    #[tokio::test]
    async fn remote_command_goes_through_gpssh() {
        let (harness, runner) = harness();

        harness
            .run_command_remote(
                "gpstop -a",
                "smdw",
                "/usr/local/gpdb/greenplum_path.sh",
                "export MASTER_DATA_DIRECTORY=/data/master/gpseg-1",
            )
            .await
            .unwrap();

        assert_eq!(
            runner.command_lines().await[0],
            "gpssh -h smdw -e 'source /usr/local/gpdb/greenplum_path.sh; \
             export MASTER_DATA_DIRECTORY=/data/master/gpseg-1; gpstop -a'"
        );
    }

    #[tokio::test]
    async fn remote_command_failure_propagates() {
        let (harness, runner) = harness();
        runner
            .respond("gpssh", 255, "", "ssh: connect to host smdw port 22")
            .await;

        let err = harness
            .run_command_remote("gpstop -a", "smdw", "path.sh", "true")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CommandFailed);
    }
}
