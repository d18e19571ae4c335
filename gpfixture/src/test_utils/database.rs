use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::database::{DbTarget, SqlClient, TextRow};
use crate::error::{FixtureError, FixtureResult};

/// Builds a row from non-null text values.
pub fn text_row(values: &[&str]) -> TextRow {
    TextRow::new(values.iter().map(|v| Some((*v).to_owned())).collect())
}

/// Builds a result set from non-null text values.
pub fn text_rows(rows: &[&[&str]]) -> Vec<TextRow> {
    rows.iter().map(|row| text_row(row)).collect()
}

/// A statement seen by [`ScriptedSqlClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlCall {
    pub target: DbTarget,
    pub sql: String,
    /// `true` for [`SqlClient::execute`], `false` for [`SqlClient::query`].
    pub execute: bool,
}

type Response = FixtureResult<Vec<TextRow>>;

#[derive(Debug)]
struct Rule {
    pattern: String,
    /// Consumed front to back; the last response repeats.
    responses: VecDeque<Response>,
}

impl Rule {
    fn next(&mut self) -> Response {
        if self.responses.len() > 1 {
            if let Some(response) = self.responses.pop_front() {
                return response;
            }
        }

        self.responses.front().cloned().unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[derive(Debug, Default)]
struct Inner {
    rules: Vec<Rule>,
    calls: Vec<SqlCall>,
}

impl Inner {
    /// The first rule registered whose pattern occurs in `sql`.
    fn respond(&mut self, sql: &str) -> Option<Response> {
        self.rules
            .iter_mut()
            .find(|rule| sql.contains(&rule.pattern))
            .map(Rule::next)
    }
}

/// [`SqlClient`] answering from canned responses.
///
/// Statements are matched by substring against the registered patterns in
/// registration order. Unmatched queries return no rows and unmatched
/// statements succeed.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSqlClient {
    inner: Arc<RwLock<Inner>>,
}

impl ScriptedSqlClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every statement containing `pattern` with `rows`.
    pub async fn on(&self, pattern: &str, rows: Vec<TextRow>) {
        self.on_sequence(pattern, vec![rows]).await;
    }

    /// Answers successive statements containing `pattern` with successive
    /// result sets; the last one keeps being returned.
    pub async fn on_sequence(&self, pattern: &str, results: Vec<Vec<TextRow>>) {
        let responses = results.into_iter().map(Ok).collect();
        self.push_rule(pattern, responses).await;
    }

    /// Fails every statement containing `pattern` with `error`.
    pub async fn fail(&self, pattern: &str, error: FixtureError) {
        self.push_rule(pattern, VecDeque::from([Err(error)])).await;
    }

    async fn push_rule(&self, pattern: &str, responses: VecDeque<Response>) {
        let mut inner = self.inner.write().await;
        inner.rules.push(Rule {
            pattern: pattern.to_owned(),
            responses,
        });
    }

    pub async fn calls(&self) -> Vec<SqlCall> {
        self.inner.read().await.calls.clone()
    }

    /// Statements passed to [`SqlClient::execute`], in order.
    pub async fn executed(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .calls
            .iter()
            .filter(|call| call.execute)
            .map(|call| call.sql.clone())
            .collect()
    }

    /// Number of statements containing `pattern`.
    pub async fn count_calls(&self, pattern: &str) -> usize {
        let inner = self.inner.read().await;
        inner
            .calls
            .iter()
            .filter(|call| call.sql.contains(pattern))
            .count()
    }

    async fn record(&self, target: &DbTarget, sql: &str, execute: bool) -> Option<Response> {
        let mut inner = self.inner.write().await;
        inner.calls.push(SqlCall {
            target: target.clone(),
            sql: sql.to_owned(),
            execute,
        });

        inner.respond(sql)
    }
}

impl SqlClient for ScriptedSqlClient {
    async fn execute(&self, target: &DbTarget, sql: &str) -> FixtureResult<()> {
        match self.record(target, sql, true).await {
            Some(Err(err)) => Err(err),
            _ => Ok(()),
        }
    }

    async fn query(&self, target: &DbTarget, sql: &str) -> FixtureResult<Vec<TextRow>> {
        self.record(target, sql, false)
            .await
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
