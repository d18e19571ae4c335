//! Seam for external process invocation.

use std::future::Future;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::bail;
use crate::error::{ErrorKind, FixtureResult};

/// Shell used for local commands; fixture command strings rely on pipes and globs.
const LOCAL_SHELL: &str = "bash";

/// A shell command, run locally or on a remote host over ssh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Short description used in logs.
    pub name: String,
    /// Command line passed to the shell.
    pub cmd_str: String,
    pub remote_host: Option<String>,
    /// Extra environment for local commands.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn local(name: impl Into<String>, cmd_str: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmd_str: cmd_str.into(),
            remote_host: None,
            env: Vec::new(),
        }
    }

    pub fn on_host(mut self, host: impl Into<String>) -> Self {
        self.remote_host = Some(host.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Exit code and captured output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub rc: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.rc == 0
    }
}

/// Runs [`CommandSpec`]s.
///
/// `Err` is reserved for commands that could not be started at all; a
/// non-zero exit is reported through [`CommandOutput::rc`].
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> impl Future<Output = FixtureResult<CommandOutput>> + Send;
}

/// [`CommandRunner`] spawning real processes.
#[derive(Debug, Clone, Default)]
pub struct ShellCommandRunner;

impl ShellCommandRunner {
    pub fn new() -> Self {
        Self
    }

    fn build(spec: &CommandSpec) -> Command {
        match &spec.remote_host {
            Some(host) => {
                let mut command = Command::new("ssh");
                command
                    .arg("-o")
                    .arg("StrictHostKeyChecking=no")
                    .arg(host)
                    .arg(&spec.cmd_str);
                command
            }
            None => {
                let mut command = Command::new(LOCAL_SHELL);
                command.arg("-c").arg(&spec.cmd_str);
                command.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
                command
            }
        }
    }
}

impl CommandRunner for ShellCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> FixtureResult<CommandOutput> {
        debug!(
            name = spec.name,
            cmd = spec.cmd_str,
            host = spec.remote_host.as_deref(),
            "running command"
        );

        let output = Self::build(spec).output().await?;

        // Processes killed by a signal have no exit code.
        let rc = output.status.code().unwrap_or(-1);

        Ok(CommandOutput {
            rc,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Runs `spec` and turns a non-zero exit into [`ErrorKind::CommandFailed`].
pub async fn run_checked<R: CommandRunner>(
    runner: &R,
    spec: &CommandSpec,
) -> FixtureResult<CommandOutput> {
    let output = runner.run(spec).await?;

    if !output.succeeded() {
        warn!(name = spec.name, rc = output.rc, "command failed");
        bail!(
            ErrorKind::CommandFailed,
            "Command exited with a non-zero status",
            format!(
                "{}: '{}' rc={} stderr={}",
                spec.name,
                spec.cmd_str,
                output.rc,
                output.stderr.trim()
            )
        );
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_shell_captures_output_and_status() {
        let runner = ShellCommandRunner::new();

        let output = runner
            .run(&CommandSpec::local("echo", "echo out; echo err >&2; exit 3"))
            .await
            .unwrap();

        assert_eq!(output.rc, 3);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn run_checked_fails_on_non_zero_exit() {
        let runner = ShellCommandRunner::new();

        let err = run_checked(&runner, &CommandSpec::local("false", "exit 1"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CommandFailed);
        assert!(err.detail().unwrap().contains("rc=1"));
    }

    #[tokio::test]
    async fn local_env_is_visible_to_command() {
        let runner = ShellCommandRunner::new();

        let output = runner
            .run(&CommandSpec::local("env", "echo $GPFIXTURE_PROBE").with_env("GPFIXTURE_PROBE", "42"))
            .await
            .unwrap();

        assert_eq!(output.stdout.trim(), "42");
    }
}
