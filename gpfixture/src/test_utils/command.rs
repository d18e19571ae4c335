use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::{FixtureError, FixtureResult};

/// Builds a [`CommandOutput`].
pub fn output(rc: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        rc,
        stdout: stdout.to_owned(),
        stderr: stderr.to_owned(),
    }
}

type Response = FixtureResult<CommandOutput>;

#[derive(Debug)]
struct Rule {
    pattern: String,
    /// Consumed front to back; the last response repeats.
    responses: VecDeque<Response>,
}

#[derive(Debug, Default)]
struct Inner {
    rules: Vec<Rule>,
    calls: Vec<CommandSpec>,
}

/// [`CommandRunner`] answering from canned outputs.
///
/// Commands are matched by substring of their command line in registration
/// order. Unmatched commands succeed with empty output.
#[derive(Debug, Clone, Default)]
pub struct RecordingCommandRunner {
    inner: Arc<RwLock<Inner>>,
}

impl RecordingCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every command containing `pattern`.
    pub async fn respond(&self, pattern: &str, rc: i32, stdout: &str, stderr: &str) {
        self.respond_sequence(pattern, vec![output(rc, stdout, stderr)])
            .await;
    }

    /// Answers successive commands containing `pattern` with successive
    /// outputs; the last one keeps being returned.
    pub async fn respond_sequence(&self, pattern: &str, outputs: Vec<CommandOutput>) {
        let responses = outputs.into_iter().map(Ok).collect();
        self.push_rule(pattern, responses).await;
    }

    /// Makes every command containing `pattern` fail to start.
    pub async fn fail_to_start(&self, pattern: &str, error: FixtureError) {
        self.push_rule(pattern, VecDeque::from([Err(error)])).await;
    }

    async fn push_rule(&self, pattern: &str, responses: VecDeque<Response>) {
        let mut inner = self.inner.write().await;
        inner.rules.push(Rule {
            pattern: pattern.to_owned(),
            responses,
        });
    }

    pub async fn calls(&self) -> Vec<CommandSpec> {
        self.inner.read().await.calls.clone()
    }

    /// Command lines run so far, in order.
    pub async fn command_lines(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.calls.iter().map(|spec| spec.cmd_str.clone()).collect()
    }
}

impl CommandRunner for RecordingCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> FixtureResult<CommandOutput> {
        let mut inner = self.inner.write().await;
        inner.calls.push(spec.clone());

        let Some(rule) = inner
            .rules
            .iter_mut()
            .find(|rule| spec.cmd_str.contains(&rule.pattern))
        else {
            return Ok(CommandOutput::default());
        };

        if rule.responses.len() > 1 {
            if let Some(response) = rule.responses.pop_front() {
                return response;
            }
        }

        rule.responses
            .front()
            .cloned()
            .unwrap_or_else(|| Ok(CommandOutput::default()))
    }
}
