//! Catalog lookups used by scenario checks.

use std::fmt;

use pg_escape::quote_identifier;
use tracing::debug;

use crate::bail;
use crate::command::CommandRunner;
use crate::context::ScenarioContext;
use crate::database::{DbTarget, SqlClient, TextRow, execute_sql_singleton, get_row, get_rows};
use crate::error::{ErrorKind, FixtureResult};
use crate::harness::Harness;
use crate::sql::{self, AppendOnlyKind, TableType};

/// Schema-qualified name of a user table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// `schema.name` as written in scenarios and dump file names.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn as_quoted_identifier(&self) -> String {
        let quoted_schema = quote_identifier(&self.schema);
        let quoted_name = quote_identifier(&self.name);
        format!("{quoted_schema}.{quoted_name}")
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Leaf append-only table with the aoseg relation holding its statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOnlyTable {
    pub oid: u32,
    pub schema: String,
    pub table: String,
    pub tupletable: String,
}

impl<C, R> Harness<C, R>
where
    C: SqlClient,
    R: CommandRunner,
{
    pub async fn check_db_exists(&self, dbname: &str) -> FixtureResult<bool> {
        let rows = self
            .client()
            .query(&DbTarget::template(), sql::list_databases())
            .await?;

        Ok(rows.iter().any(|row| row.get_opt(0) == Some(dbname)))
    }

    pub async fn check_schema_exists(&self, schema: &str, dbname: &str) -> FixtureResult<bool> {
        let rows = get_rows(self.client(), dbname, &sql::schema_exists(schema)).await?;

        Ok(!rows.is_empty())
    }

    /// User tables of `dbname`, temporary schemas excluded.
    pub async fn get_table_names(&self, dbname: &str) -> FixtureResult<Vec<TableName>> {
        let rows = get_rows(self.client(), dbname, sql::user_tables()).await?;

        rows.iter()
            .map(|row| Ok(TableName::new(row.get_str(0)?, row.get_str(1)?)))
            .collect()
    }

    /// Whether `table` resolves to a relation, and when `table_type` is given,
    /// whether it has that storage.
    ///
    /// A failed lookup counts as absent; its error is kept on `context` when
    /// one is passed.
    pub async fn check_table_exists(
        &self,
        dbname: &str,
        table: &str,
        table_type: Option<TableType>,
        context: Option<&mut ScenarioContext>,
    ) -> FixtureResult<bool> {
        let row = match get_row(self.client(), dbname, &sql::table_storage(table)).await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(false),
            Err(err) => {
                debug!(dbname, table, "table lookup failed: {err}");
                if let Some(context) = context {
                    context.record_lookup_error(err);
                }
                return Ok(false);
            }
        };

        let Some(expected) = table_type else {
            return Ok(true);
        };

        let actual = TableType::from_relstorage(row.get_str(2)?)?;

        Ok(actual == expected)
    }

    pub async fn check_pl_exists(&self, dbname: &str, lanname: &str) -> FixtureResult<bool> {
        self.count_is_positive(dbname, &sql::language_count(lanname))
            .await
    }

    pub async fn check_constraint_exists(&self, dbname: &str, conname: &str) -> FixtureResult<bool> {
        self.count_is_positive(dbname, &sql::constraint_count(conname))
            .await
    }

    async fn count_is_positive(&self, dbname: &str, sql: &str) -> FixtureResult<bool> {
        Ok(self.count(dbname, sql).await? > 0)
    }

    /// Runs a single-value query and parses its result as an integer.
    pub(crate) async fn count(&self, dbname: &str, sql: &str) -> FixtureResult<i64> {
        let value = execute_sql_singleton(self.client(), dbname, sql).await?;
        let row = TextRow::new(vec![Some(value)]);

        row.get_i64(0)
    }

    /// Child partitions of `table` at `level`.
    pub async fn get_partition_tablenames(
        &self,
        table: &str,
        dbname: &str,
        level: u32,
    ) -> FixtureResult<Vec<String>> {
        let rows = get_rows(
            self.client(),
            dbname,
            &sql::partition_tablenames(table, level),
        )
        .await?;

        rows.iter()
            .map(|row| Ok(row.get_str(0)?.trim().to_owned()))
            .collect()
    }

    /// `schema.partition` names at the given level and position.
    pub async fn get_partition_names(
        &self,
        schema: &str,
        table: &str,
        dbname: &str,
        level: u32,
        position: u32,
    ) -> FixtureResult<Vec<String>> {
        let rows = get_rows(
            self.client(),
            dbname,
            &sql::partition_names(schema, table, level, position),
        )
        .await?;

        rows.iter()
            .map(|row| Ok(row.get_str(0)?.trim().to_owned()))
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn check_partition_table_exists(
        &self,
        dbname: &str,
        schema: &str,
        table: &str,
        table_type: Option<TableType>,
        level: u32,
        position: u32,
        context: Option<&mut ScenarioContext>,
    ) -> FixtureResult<bool> {
        let partitions = self
            .get_partition_names(schema, table, dbname, level, position)
            .await?;
        let Some(partition) = partitions.first() else {
            return Ok(false);
        };

        self.check_table_exists(dbname, partition, table_type, context)
            .await
    }

    pub async fn get_segment_hostnames(&self, dbname: &str) -> FixtureResult<Vec<String>> {
        self.hostnames(dbname, sql::segment_hostnames()).await
    }

    pub async fn get_master_hostname(&self, dbname: &str) -> FixtureResult<Vec<String>> {
        self.hostnames(dbname, sql::master_hostname()).await
    }

    /// Hosts running at least one primary.
    pub async fn get_hosts(&self, dbname: &str) -> FixtureResult<Vec<String>> {
        self.hostnames(dbname, sql::primary_hosts()).await
    }

    /// `(hostname, data directory)` of every primary.
    pub async fn get_hosts_and_datadirs(&self, dbname: &str) -> FixtureResult<Vec<(String, String)>> {
        let rows = get_rows(self.client(), dbname, sql::hosts_and_datadirs()).await?;

        rows.iter()
            .map(|row| {
                Ok((
                    row.get_str(0)?.trim().to_owned(),
                    row.get_str(1)?.trim().to_owned(),
                ))
            })
            .collect()
    }

    /// Filespace locations of the primaries on `host`.
    pub async fn get_backup_dir_for_host(&self, host: &str, dbname: &str) -> FixtureResult<Vec<String>> {
        let rows = get_rows(self.client(), dbname, &sql::backup_dirs_for_host(host)).await?;

        rows.iter()
            .map(|row| Ok(row.get_str(0)?.trim().to_owned()))
            .collect()
    }

    /// Segment hosts followed by the master host.
    pub async fn get_all_hostnames_as_list(&self, dbname: &str) -> FixtureResult<Vec<String>> {
        let mut hosts = self.get_segment_hostnames(dbname).await?;
        hosts.extend(self.get_master_hostname(dbname).await?);

        Ok(hosts)
    }

    pub async fn get_table_oid(&self, dbname: &str, schema: &str, table: &str) -> FixtureResult<u32> {
        let oid = execute_sql_singleton(self.client(), dbname, &sql::table_oid(schema, table)).await?;

        Ok(oid.trim().parse()?)
    }

    /// Fails unless `table` holds exactly `expected` rows. A missing table
    /// fails too.
    pub async fn check_row_count(&self, table: &str, dbname: &str, expected: i64) -> FixtureResult<()> {
        let actual = self.count(dbname, &sql::row_count(table)).await?;
        if actual != expected {
            bail!(
                ErrorKind::AssertionFailed,
                "Unexpected row count",
                format!("{actual} rows in table {dbname}.{table}, expected row count = {expected}")
            );
        }

        Ok(())
    }

    pub async fn check_empty_table(&self, table: &str, dbname: &str) -> FixtureResult<()> {
        self.check_row_count(table, dbname, 0).await
    }

    /// Fails unless the single value returned by `query` equals `expected`.
    pub async fn check_count_for_specific_query(
        &self,
        dbname: &str,
        query: &str,
        expected: i64,
    ) -> FixtureResult<()> {
        let actual = self.count(dbname, query).await?;
        if actual != expected {
            bail!(
                ErrorKind::AssertionFailed,
                "Unexpected row count",
                format!("{actual} rows in table {dbname}.{query}, expected row count = {expected}")
            );
        }

        Ok(())
    }

    /// Leaf append-only tables of the given layout.
    pub async fn get_partition_list(
        &self,
        kind: AppendOnlyKind,
        dbname: &str,
    ) -> FixtureResult<Vec<AppendOnlyTable>> {
        let rows = get_rows(self.client(), dbname, &sql::appendonly_tables(kind)).await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in &rows {
            if row.len() != 4 {
                let values = row.0.iter().map(|v| v.as_deref().unwrap_or("")).collect::<Vec<_>>();
                bail!(
                    ErrorKind::QueryFailed,
                    "Invalid results from query to get all AO tables",
                    values.join(",")
                );
            }

            tables.push(AppendOnlyTable {
                oid: row.get_str(0)?.trim().parse()?,
                schema: row.get_str(1)?.trim().to_owned(),
                table: row.get_str(2)?.trim().to_owned(),
                tupletable: row.get_str(3)?.trim().to_owned(),
            });
        }

        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture_error;
    use crate::test_utils::database::{text_row, text_rows};
    use crate::test_utils::{test_config, test_harness};

    #[tokio::test]
    async fn db_exists_checks_template1() {
        let (harness, client, _) = test_harness(test_config());
        client
            .on("pg_database", text_rows(&[&["template1"], &["postgres"], &["testdb"]]))
            .await;

        assert!(harness.check_db_exists("testdb").await.unwrap());
        assert!(!harness.check_db_exists("test").await.unwrap());
        assert_eq!(client.calls().await[0].target.dbname, "template1");
    }

    #[tokio::test]
    async fn table_exists_compares_storage() {
        let (harness, client, _) = test_harness(test_config());
        client
            .on(
                "'public.sales'::regclass",
                text_rows(&[&["sales", "r", "a", "{appendonly=true}"]]),
            )
            .await;

        assert!(harness.check_table_exists("testdb", "public.sales", None, None).await.unwrap());
        assert!(harness
            .check_table_exists("testdb", "public.sales", Some(TableType::Ao), None)
            .await
            .unwrap());
        assert!(!harness
            .check_table_exists("testdb", "public.sales", Some(TableType::Heap), None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn lookup_failure_is_absent_and_recorded() {
        let (harness, client, _) = test_harness(test_config());
        client
            .fail(
                "regclass",
                fixture_error!(ErrorKind::QueryFailed, "Greenplum schema object not found"),
            )
            .await;
        let mut context = ScenarioContext::new();

        let exists = harness
            .check_table_exists("testdb", "missing", None, Some(&mut context))
            .await
            .unwrap();

        assert!(!exists);
        assert_eq!(context.lookup_error().unwrap().kind(), ErrorKind::QueryFailed);
    }

    #[tokio::test]
    async fn unknown_relstorage_is_an_error() {
        let (harness, client, _) = test_harness(test_config());
        client.on("regclass", text_rows(&[&["t", "r", "p", ""]])).await;

        let err = harness
            .check_table_exists("testdb", "t", Some(TableType::Heap), None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn row_count_mismatch_names_table_and_counts() {
        let (harness, client, _) = test_harness(test_config());
        client.on("count(*) from sales", vec![text_row(&["1094"])]).await;

        harness.check_row_count("sales", "testdb", 1094).await.unwrap();
        let err = harness.check_row_count("sales", "testdb", 0).await.unwrap_err();

        assert_eq!(
            err.detail(),
            Some("1094 rows in table testdb.sales, expected row count = 0")
        );
    }

    #[tokio::test]
    async fn query_count_mismatch_uses_row_count_wording() {
        let (harness, client, _) = test_harness(test_config());
        client
            .on("select count(*) from sales where id > 10", vec![text_row(&["7"])])
            .await;

        let err = harness
            .check_count_for_specific_query("testdb", "select count(*) from sales where id > 10", 3)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AssertionFailed);
        assert_eq!(
            err.detail(),
            Some("7 rows in table testdb.select count(*) from sales where id > 10, expected row count = 3")
        );
    }

    #[tokio::test]
    async fn all_hostnames_lists_segments_then_master() {
        let (harness, client, _) = test_harness(test_config());
        client.on("content != -1", text_rows(&[&["sdw1 "], &["sdw2"]])).await;
        client.on("content = -1", text_rows(&[&[" mdw"]])).await;

        let hosts = harness.get_all_hostnames_as_list("template1").await.unwrap();

        assert_eq!(hosts, vec!["sdw1", "sdw2", "mdw"]);
    }

    #[tokio::test]
    async fn partition_list_rejects_short_rows() {
        let (harness, client, _) = test_harness(test_config());
        client
            .on(
                "pg_appendonly.columnstore = 'f'",
                text_rows(&[&["16385", "public", "sales_1_prt_p1", "pg_aoseg_16385"]]),
            )
            .await;
        client.on("pg_appendonly.columnstore = 't'", text_rows(&[&["16390", "public"]])).await;

        let tables = harness.get_partition_list(AppendOnlyKind::Ao, "testdb").await.unwrap();
        assert_eq!(tables[0].oid, 16385);
        assert_eq!(tables[0].tupletable, "pg_aoseg_16385");

        let err = harness
            .get_partition_list(AppendOnlyKind::Co, "testdb")
            .await
            .unwrap_err();
        assert_eq!(err.detail(), Some("16390,public"));
    }

    #[test]
    fn table_name_forms() {
        let name = TableName::new("public", "sales");
        assert_eq!(name.qualified(), "public.sales");
        assert_eq!(name.to_string(), "public.sales");
    }
}
