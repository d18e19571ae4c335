//! Seam between fixture operations and the cluster's SQL interface.
//!
//! Operations never hold a connection: like the shell helpers they replace,
//! each call opens a connection to the [`DbTarget`], runs its statements and
//! drops it. Rows come back in text form, which is what catalog checks compare.

use std::future::Future;

use gpfixture_config::shared::{IntoConnectOptions, PgConnectionConfig, TEMPLATE_DATABASE};
use tokio_postgres::{NoTls, SimpleQueryMessage};
use tracing::{debug, error};

use crate::bail;
use crate::error::{ErrorKind, FixtureResult};
use crate::fixture_error;

/// Connection option switching a backend into utility mode, which lets a
/// session talk to a single segment directly.
const UTILITY_MODE_OPTIONS: &str = "-c gp_session_role=utility";

/// Where a statement runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbTarget {
    pub dbname: String,
    /// Overrides the configured master host.
    pub host: Option<String>,
    /// Overrides the configured master port.
    pub port: Option<u16>,
    /// Overrides the configured role.
    pub user: Option<String>,
    /// Connects in utility mode, bypassing the dispatcher.
    pub utility: bool,
}

impl DbTarget {
    /// Targets `dbname` on the master.
    pub fn database(dbname: impl Into<String>) -> Self {
        Self {
            dbname: dbname.into(),
            host: None,
            port: None,
            user: None,
            utility: false,
        }
    }

    /// Targets `template1` on the master.
    pub fn template() -> Self {
        Self::database(TEMPLATE_DATABASE)
    }

    pub fn on_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn utility(mut self) -> Self {
        self.utility = true;
        self
    }
}

/// One result row with every column in its text representation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextRow(pub Vec<Option<String>>);

impl TextRow {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the column as text, `None` for SQL `NULL` or a missing column.
    pub fn get_opt(&self, index: usize) -> Option<&str> {
        self.0.get(index).and_then(|value| value.as_deref())
    }

    /// Returns the column as text, failing on `NULL` or a missing column.
    pub fn get_str(&self, index: usize) -> FixtureResult<&str> {
        match self.0.get(index) {
            Some(Some(value)) => Ok(value),
            Some(None) => bail!(
                ErrorKind::ConversionError,
                "Column is NULL",
                format!("column {index}")
            ),
            None => bail!(
                ErrorKind::ConversionError,
                "Column index out of range",
                format!("column {index} of a {}-column row", self.len())
            ),
        }
    }

    /// Parses the column as an integer.
    ///
    /// Float-typed counters such as `pg_aoseg.tupcount` render as `1094` or
    /// `1094.0`; both are accepted as long as there is no fractional part.
    pub fn get_i64(&self, index: usize) -> FixtureResult<i64> {
        let value = self.get_str(index)?.trim();
        if let Ok(parsed) = value.parse::<i64>() {
            return Ok(parsed);
        }

        let float = value.parse::<f64>()?;
        if float.fract() != 0.0 {
            bail!(
                ErrorKind::ConversionError,
                "Expected an integral value",
                value
            );
        }

        Ok(float as i64)
    }

    pub fn get_f64(&self, index: usize) -> FixtureResult<f64> {
        Ok(self.get_str(index)?.trim().parse::<f64>()?)
    }
}

/// Runs SQL against the cluster.
pub trait SqlClient {
    /// Runs one or more statements and commits them.
    fn execute(&self, target: &DbTarget, sql: &str) -> impl Future<Output = FixtureResult<()>> + Send;

    /// Runs a query and returns every row.
    fn query(
        &self,
        target: &DbTarget,
        sql: &str,
    ) -> impl Future<Output = FixtureResult<Vec<TextRow>>> + Send;
}

/// [`SqlClient`] talking to a live cluster through `tokio-postgres`.
#[derive(Debug, Clone)]
pub struct PgSqlClient {
    config: PgConnectionConfig,
}

impl PgSqlClient {
    pub fn new(config: PgConnectionConfig) -> Self {
        Self { config }
    }

    async fn connect(&self, target: &DbTarget) -> FixtureResult<tokio_postgres::Client> {
        let mut config = self.config.clone();
        config.name = target.dbname.clone();
        if let Some(host) = &target.host {
            config.host = host.clone();
        }
        if let Some(port) = target.port {
            config.port = port;
        }
        if let Some(user) = &target.user {
            config.username = user.clone();
        }

        let mut options: tokio_postgres::Config = config.with_db();
        if target.utility {
            options.options(UTILITY_MODE_OPTIONS);
        }

        let (client, connection) = options.connect(NoTls).await?;

        let dbname = target.dbname.clone();
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(dbname, "connection error: {err}");
            }
        });

        Ok(client)
    }
}

impl SqlClient for PgSqlClient {
    async fn execute(&self, target: &DbTarget, sql: &str) -> FixtureResult<()> {
        debug!(dbname = target.dbname, utility = target.utility, sql, "executing sql");

        let client = self.connect(target).await?;
        // A multi-statement simple query runs as one implicit transaction.
        client.batch_execute(sql).await?;

        Ok(())
    }

    async fn query(&self, target: &DbTarget, sql: &str) -> FixtureResult<Vec<TextRow>> {
        debug!(dbname = target.dbname, utility = target.utility, sql, "querying");

        let client = self.connect(target).await?;
        let messages = client.simple_query(sql).await?;

        let rows = messages
            .into_iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(TextRow::new(
                    (0..row.len())
                        .map(|i| row.get(i).map(str::to_owned))
                        .collect(),
                )),
                _ => None,
            })
            .collect();

        Ok(rows)
    }
}

/// Runs `sql` on `dbname` and commits.
pub async fn execute_sql<C: SqlClient>(client: &C, dbname: &str, sql: &str) -> FixtureResult<()> {
    client.execute(&DbTarget::database(dbname), sql).await
}

/// Returns the first column of the first row, failing when there is none.
pub async fn execute_sql_singleton<C: SqlClient>(
    client: &C,
    dbname: &str,
    sql: &str,
) -> FixtureResult<String> {
    let row = get_row(client, dbname, sql).await?;

    match row.as_ref().and_then(|row| row.get_opt(0)) {
        Some(value) => Ok(value.to_owned()),
        None => Err(fixture_error!(
            ErrorKind::EmptyResult,
            "error running query",
            sql
        )),
    }
}

pub async fn get_rows<C: SqlClient>(
    client: &C,
    dbname: &str,
    sql: &str,
) -> FixtureResult<Vec<TextRow>> {
    client.query(&DbTarget::database(dbname), sql).await
}

pub async fn get_row<C: SqlClient>(
    client: &C,
    dbname: &str,
    sql: &str,
) -> FixtureResult<Option<TextRow>> {
    Ok(get_rows(client, dbname, sql).await?.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[Option<&str>]) -> TextRow {
        TextRow::new(values.iter().map(|v| v.map(str::to_owned)).collect())
    }

    #[test]
    fn integers_accept_integral_float_text() {
        let row = row(&[Some("1094"), Some("1094.0"), Some(" 12 "), Some("3.5")]);

        assert_eq!(row.get_i64(0).unwrap(), 1094);
        assert_eq!(row.get_i64(1).unwrap(), 1094);
        assert_eq!(row.get_i64(2).unwrap(), 12);
        assert_eq!(row.get_i64(3).unwrap_err().kind(), ErrorKind::ConversionError);
    }

    #[test]
    fn null_and_missing_columns_are_errors() {
        let row = row(&[None]);

        assert_eq!(row.get_opt(0), None);
        assert!(row.get_str(0).is_err());
        assert!(row.get_str(1).is_err());
    }

    #[test]
    fn segment_target_uses_utility_mode() {
        let target = DbTarget::database("testdb").on_host("sdw1", 40000).utility();

        assert_eq!(target.host.as_deref(), Some("sdw1"));
        assert_eq!(target.port, Some(40000));
        assert!(target.utility);
        assert_eq!(DbTarget::template().dbname, "template1");
    }
}
