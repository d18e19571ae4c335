//! Per-scenario record of the last command and checks against it.

use regex::Regex;

use crate::bail;
use crate::command::CommandOutput;
use crate::error::{ErrorKind, FixtureError, FixtureResult};

/// Result of a command run on behalf of a scenario step.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub output: CommandOutput,
    /// Set when the command exited non-zero.
    pub failure: Option<FixtureError>,
}

/// State a scenario carries between its steps.
#[derive(Debug, Default)]
pub struct ScenarioContext {
    last: Option<CommandOutcome>,
    /// Error captured by a catalog lookup that reports absence as `false`.
    lookup_error: Option<FixtureError>,
}

impl ScenarioContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the last command outcome.
    pub fn record(&mut self, outcome: CommandOutcome) {
        self.last = Some(outcome);
    }

    pub fn record_lookup_error(&mut self, error: FixtureError) {
        self.lookup_error = Some(error);
    }

    pub fn last(&self) -> Option<&CommandOutcome> {
        self.last.as_ref()
    }

    pub fn lookup_error(&self) -> Option<&FixtureError> {
        self.lookup_error.as_ref()
    }

    pub fn ret_code(&self) -> Option<i32> {
        self.last.as_ref().map(|outcome| outcome.output.rc)
    }

    pub fn stdout_message(&self) -> &str {
        self.last
            .as_ref()
            .map(|outcome| outcome.output.stdout.as_str())
            .unwrap_or_default()
    }

    pub fn error_message(&self) -> &str {
        self.last
            .as_ref()
            .map(|outcome| outcome.output.stderr.as_str())
            .unwrap_or_default()
    }

    /// Returns `true` when the last command failed.
    pub fn has_exception(&self) -> bool {
        self.last
            .as_ref()
            .is_some_and(|outcome| outcome.failure.is_some())
    }

    /// Removes and returns the failure of the last command, if any.
    pub fn take_exception(&mut self) -> Option<FixtureError> {
        self.last.as_mut().and_then(|outcome| outcome.failure.take())
    }

    /// Checks that stdout of the last command matches `pattern`.
    pub fn check_stdout_msg(&self, pattern: &str) -> FixtureResult<()> {
        let stdout = self.stdout_message();
        if !Regex::new(pattern)?.is_match(stdout) {
            bail!(
                ErrorKind::AssertionFailed,
                "Expected stdout string not found",
                format!("Expected stdout string '{pattern}' and found: '{stdout}'")
            );
        }

        Ok(())
    }

    /// Checks that stdout of the last command does not match `pattern`.
    pub fn check_string_not_present_stdout(&self, pattern: &str) -> FixtureResult<()> {
        let stdout = self.stdout_message();
        if Regex::new(pattern)?.is_match(stdout) {
            bail!(
                ErrorKind::AssertionFailed,
                "Unexpected stdout string found",
                format!("Did not expect stdout string '{pattern}' but found: '{stdout}'")
            );
        }

        Ok(())
    }

    /// Checks that a command ran and its stderr matches `pattern`.
    pub fn check_err_msg(&self, pattern: &str) -> FixtureResult<()> {
        if self.last.is_none() {
            bail!(
                ErrorKind::AssertionFailed,
                "An exception was not raised and it was expected"
            );
        }

        let stderr = self.error_message();
        if !Regex::new(pattern)?.is_match(stderr) {
            bail!(
                ErrorKind::AssertionFailed,
                "Expected error string not found",
                format!("Expected error string '{pattern}' and found: '{stderr}'")
            );
        }

        Ok(())
    }

    /// Checks the exit code of the last command.
    pub fn check_return_code(&self, expected: i32) -> FixtureResult<()> {
        let actual = self.ret_code();
        if actual != Some(expected) {
            let actual = actual.map_or_else(|| "none".to_owned(), |rc| rc.to_string());
            bail!(
                ErrorKind::AssertionFailed,
                "Unexpected return code",
                format!(
                    "expected return code '{expected}' does not equal actual return code '{actual}' {}",
                    self.error_message()
                )
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture_error;

    fn context_with(rc: i32, stdout: &str, stderr: &str) -> ScenarioContext {
        let mut context = ScenarioContext::new();
        context.record(CommandOutcome {
            output: CommandOutput {
                rc,
                stdout: stdout.to_owned(),
                stderr: stderr.to_owned(),
            },
            failure: (rc != 0).then(|| fixture_error!(ErrorKind::CommandFailed, "failed")),
        });
        context
    }

    #[test]
    fn stdout_checks_use_regular_expressions() {
        let context = context_with(0, "gpstart:mdw:gpadmin-[INFO]:-Database successfully started", "");

        context.check_stdout_msg("successfully started").unwrap();
        context.check_stdout_msg(r"\[INFO\]").unwrap();
        context.check_string_not_present_stdout("FATAL").unwrap();

        let err = context.check_stdout_msg("stopped").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AssertionFailed);
        assert!(err.detail().unwrap().contains("Expected stdout string 'stopped'"));
        assert!(context.check_string_not_present_stdout("INFO").is_err());
    }

    #[test]
    fn err_msg_requires_a_recorded_command() {
        let context = ScenarioContext::new();
        assert!(context.check_err_msg("anything").is_err());

        let context = context_with(1, "", "createdb: database creation failed");
        context.check_err_msg("creation failed").unwrap();
        assert!(context.check_err_msg("permission denied").is_err());
    }

    #[test]
    fn return_code_mismatch_reports_stderr() {
        let context = context_with(2, "", "gpstop failed");

        context.check_return_code(2).unwrap();
        let err = context.check_return_code(0).unwrap_err();
        assert!(err.detail().unwrap().contains("gpstop failed"));
    }

    #[test]
    fn exception_is_taken_once() {
        let mut context = context_with(1, "", "");

        assert!(context.has_exception());
        assert!(context.take_exception().is_some());
        assert!(!context.has_exception());
        assert!(context.take_exception().is_none());
    }
}
