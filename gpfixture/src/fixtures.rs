//! DDL and DML that set scenario tables up.

use tracing::{debug, info, warn};

use crate::bail;
use crate::command::CommandRunner;
use crate::database::{SqlClient, execute_sql, get_rows};
use crate::error::{ErrorKind, FixtureError, FixtureResult};
use crate::fixture_error;
use crate::harness::Harness;
use crate::sql::{
    self, DEFAULT_ROW_COUNT, INT_TABLE_ROWS, PARTITION_START_DATE, StorageType, TableType,
};
use crate::sync::PollPolicy;

/// Rows inserted into [`Harness::create_external_partition`] tables.
const EXTERNAL_PARTITION_ROWS: u32 = 100;

/// Times [`Harness::modify_partition_data`] appends its row.
const MODIFY_PARTITION_INSERTS: usize = 10;

impl<C, R> Harness<C, R>
where
    C: SqlClient,
    R: CommandRunner,
{
    /// Runs `createdb` until the database shows up in `pg_database`, retrying
    /// on the database retry policy.
    pub async fn create_database(&self, dbname: &str) -> FixtureResult<()> {
        let policy = PollPolicy::from(self.config().database_retry);

        let mut last_failure: Option<FixtureError> = None;
        for attempt in 1..=policy.max_attempts {
            let outcome = self.run_gpcommand(&format!("createdb {dbname}")).await?;
            last_failure = outcome.failure;

            if last_failure.is_none() && self.check_db_exists(dbname).await? {
                info!(dbname, attempt, "created database");
                return Ok(());
            }

            debug!(dbname, attempt, "database not created yet");
            tokio::time::sleep(policy.interval).await;
        }

        match last_failure {
            Some(failure) => Err(failure),
            None => Err(fixture_error!(
                ErrorKind::CommandFailed,
                "Database creation failed",
                format!(
                    "createdb for '{dbname}' failed after {} attempts",
                    policy.max_attempts
                )
            )),
        }
    }

    /// Runs `dropdb` until the database is gone from `pg_database`.
    pub async fn drop_database(&self, dbname: &str) -> FixtureResult<()> {
        let policy = PollPolicy::from(self.config().database_retry);

        let mut last_failure: Option<FixtureError> = None;
        for attempt in 1..=policy.max_attempts {
            let outcome = self.run_gpcommand(&format!("dropdb {dbname}")).await?;
            last_failure = outcome.failure;

            if last_failure.is_none() && !self.check_db_exists(dbname).await? {
                info!(dbname, attempt, "dropped database");
                return Ok(());
            }

            debug!(dbname, attempt, "database not dropped yet");
            tokio::time::sleep(policy.interval).await;
        }

        match last_failure {
            Some(failure) => Err(failure),
            None => Err(fixture_error!(
                ErrorKind::CommandFailed,
                "Database removal failed",
                format!("db exists after dropping: {dbname}")
            )),
        }
    }

    pub async fn create_database_if_not_exists(&self, dbname: &str) -> FixtureResult<()> {
        if !self.check_db_exists(dbname).await? {
            self.create_database(dbname).await?;
        }

        Ok(())
    }

    pub async fn drop_database_if_exists(&self, dbname: &str) -> FixtureResult<()> {
        if self.check_db_exists(dbname).await? {
            self.drop_database(dbname).await?;
        }

        Ok(())
    }

    pub async fn create_schema(&self, schema: &str, dbname: &str) -> FixtureResult<()> {
        if !self.check_schema_exists(schema, dbname).await? {
            execute_sql(self.client(), dbname, &sql::create_schema(schema)).await?;
        }

        Ok(())
    }

    /// Drops `schema` with everything in it.
    pub async fn drop_schema(&self, schema: &str, dbname: &str) -> FixtureResult<()> {
        execute_sql(self.client(), dbname, &sql::drop_schema(schema)).await?;

        if self.check_schema_exists(schema, dbname).await? {
            bail!(
                ErrorKind::AssertionFailed,
                "Unable to successfully drop the schema",
                schema
            );
        }

        Ok(())
    }

    pub async fn drop_schema_if_exists(&self, schema: &str, dbname: &str) -> FixtureResult<()> {
        if self.check_schema_exists(schema, dbname).await? {
            self.drop_schema(schema, dbname).await?;
        }

        Ok(())
    }

    pub async fn drop_table(&self, table: &str, dbname: &str) -> FixtureResult<()> {
        execute_sql(self.client(), dbname, &sql::drop_table(table)).await?;

        if self.check_table_exists(dbname, table, None, None).await? {
            bail!(
                ErrorKind::AssertionFailed,
                "Unable to successfully drop the table",
                table
            );
        }

        Ok(())
    }

    pub async fn drop_table_if_exists(&self, table: &str, dbname: &str) -> FixtureResult<()> {
        if self.check_table_exists(dbname, table, None, None).await? {
            self.drop_table(table, dbname).await?;
        }

        Ok(())
    }

    pub async fn drop_external_table(&self, table: &str, dbname: &str) -> FixtureResult<()> {
        execute_sql(self.client(), dbname, &sql::drop_external_table(table)).await?;

        if self
            .check_table_exists(dbname, table, Some(TableType::External), None)
            .await?
        {
            bail!(
                ErrorKind::AssertionFailed,
                "Unable to successfully drop the table",
                table
            );
        }

        Ok(())
    }

    pub async fn drop_external_table_if_exists(&self, table: &str, dbname: &str) -> FixtureResult<()> {
        if self
            .check_table_exists(dbname, table, Some(TableType::External), None)
            .await?
        {
            self.drop_external_table(table, dbname).await?;
        }

        Ok(())
    }

    /// Creates a single `c1` column table holding `1..=1000`.
    ///
    /// `table_type` is `heap`, `ao` or `co` in any case.
    pub async fn create_int_table(&self, table: &str, table_type: &str, dbname: &str) -> FixtureResult<()> {
        let storage: StorageType = table_type.parse()?;

        execute_sql(self.client(), dbname, &sql::create_int_table(table, storage)).await?;

        let rows = self.count(dbname, &sql::row_count(table)).await?;
        if rows != INT_TABLE_ROWS {
            bail!(
                ErrorKind::AssertionFailed,
                "Integer table creation was not successful",
                format!("Expected {INT_TABLE_ROWS} does not match {rows}")
            );
        }

        Ok(())
    }

    /// Creates the `backup`/`restore` list partitioned table with yearly range
    /// subpartitions and fills it.
    pub async fn create_partition(
        &self,
        table: &str,
        storage: StorageType,
        dbname: &str,
        compression: Option<&str>,
        partition: bool,
        rowcount: u32,
    ) -> FixtureResult<()> {
        let create = sql::create_partition(table, storage, compression, partition);
        execute_sql(self.client(), dbname, &create).await?;

        self.populate_partition(table, PARTITION_START_DATE, dbname, 0, rowcount)
            .await
    }

    /// Inserts a `backup` and a `restore` series of `rowcount + 1` rows each,
    /// shifted by `offset`.
    pub async fn populate_partition(
        &self,
        table: &str,
        start_date: &str,
        dbname: &str,
        offset: u32,
        rowcount: u32,
    ) -> FixtureResult<()> {
        let insert = sql::populate_partition(table, start_date, offset, rowcount);

        execute_sql(self.client(), dbname, &insert).await
    }

    pub async fn populate_partition_same_data(&self, table: &str, dbname: &str) -> FixtureResult<()> {
        self.populate_partition(table, PARTITION_START_DATE, dbname, 0, DEFAULT_ROW_COUNT)
            .await
    }

    /// Same row count and file size as [`Self::populate_partition_same_data`]
    /// with different values.
    pub async fn populate_partition_diff_data_same_eof(
        &self,
        table: &str,
        dbname: &str,
    ) -> FixtureResult<()> {
        self.populate_partition(table, PARTITION_START_DATE, dbname, 1, DEFAULT_ROW_COUNT)
            .await
    }

    pub async fn create_mixed_storage_partition(&self, table: &str, dbname: &str) -> FixtureResult<()> {
        execute_sql(
            self.client(),
            dbname,
            &sql::create_mixed_storage_partition(table),
        )
        .await?;

        self.populate_partition(table, PARTITION_START_DATE, dbname, 0, DEFAULT_ROW_COUNT)
            .await
    }

    /// Creates a range partitioned table whose `p_2` partition reads
    /// `filename` from a gpfdist server on the master at `port`.
    pub async fn create_external_partition(
        &self,
        table: &str,
        dbname: &str,
        port: u16,
        filename: &str,
    ) -> FixtureResult<()> {
        let masters = self.get_master_hostname(dbname).await?;
        let Some(master) = masters.first() else {
            bail!(
                ErrorKind::EmptyResult,
                "Master hostname not found in gp_segment_configuration"
            );
        };

        let statements = sql::create_external_partition(table, master, port, filename);
        execute_sql(self.client(), dbname, &statements).await?;

        self.populate_partition(table, PARTITION_START_DATE, dbname, 0, EXTERNAL_PARTITION_ROWS)
            .await
    }

    /// Adds default partition `p<num>` and inserts `update` rows into it.
    pub async fn add_partition(&self, num: u32, table: &str, dbname: &str) -> FixtureResult<()> {
        execute_sql(self.client(), dbname, &sql::add_partition(num, table)).await
    }

    pub async fn drop_partition(&self, num: u32, table: &str, dbname: &str) -> FixtureResult<()> {
        execute_sql(self.client(), dbname, &sql::drop_partition(num, table)).await
    }

    /// Creates a table with thousands of partitions and checks it landed in
    /// `pg_class` exactly once.
    pub async fn create_large_num_partitions(
        &self,
        storage: StorageType,
        table: &str,
        dbname: &str,
        num_partitions: Option<u32>,
    ) -> FixtureResult<()> {
        let create = sql::create_large_num_partitions(storage, table, num_partitions);
        execute_sql(self.client(), dbname, &create).await?;

        let num_rows = self.count(dbname, &sql::pg_class_count(table)).await?;
        if num_rows != 1 {
            bail!(
                ErrorKind::AssertionFailed,
                "Creation of table failed",
                format!("{dbname}:{table}, num rows in pg_class = {num_rows}")
            );
        }

        Ok(())
    }

    /// Appends a `backup` row dated at the end of the year of partition 1, 2
    /// or 3, ten times over `psql`.
    pub async fn modify_partition_data(
        &self,
        table: &str,
        dbname: &str,
        partition: u32,
    ) -> FixtureResult<()> {
        let year = match partition {
            1 => 2010,
            2 => 2011,
            3 => 2012,
            other => bail!(
                ErrorKind::InvalidInput,
                "BAD PARAM to modify_partition_data",
                other
            ),
        };

        let cmd = format!(
            "echo \"90,backup,{year}-12-30\" | psql -d {dbname} -c \"copy {table} from stdin delimiter ',';\""
        );
        for _ in 0..MODIFY_PARTITION_INSERTS {
            let spec = self.local(format!("insert data into {table}"), cmd.clone());
            self.run_spec_checked(&spec).await?;
        }

        Ok(())
    }

    /// Doubles the rows of `table` by copying it onto itself.
    pub async fn modify_data(&self, table: &str, dbname: &str) -> FixtureResult<()> {
        let cmd = format!(
            "psql -d {dbname} -c \"copy {table} to stdout;\" | psql -d {dbname} -c \"copy {table} from stdin;\""
        );
        let spec = self.local(format!("insert data into {table}"), cmd);
        self.run_spec_checked(&spec).await?;

        Ok(())
    }

    pub async fn truncate_table(&self, dbname: &str, table: &str) -> FixtureResult<()> {
        execute_sql(self.client(), dbname, &sql::truncate(table)).await
    }

    pub async fn insert_numbers(&self, dbname: &str, table: &str, low: i64, high: i64) -> FixtureResult<()> {
        execute_sql(self.client(), dbname, &sql::insert_numbers(table, low, high)).await
    }

    /// Inserts one row; `values` is the literal list between the parentheses.
    pub async fn insert_row(&self, values: &str, table: &str, dbname: &str) -> FixtureResult<()> {
        execute_sql(self.client(), dbname, &sql::insert_row(table, values)).await
    }

    pub async fn delete_rows_from_table(
        &self,
        dbname: &str,
        table: &str,
        column: &str,
        info: &str,
    ) -> FixtureResult<()> {
        execute_sql(self.client(), dbname, &sql::delete_rows(table, column, info)).await
    }

    /// Creates a heap table shaped like a `pg_aoseg` relation.
    pub async fn create_fake_pg_aoseg_table(&self, table: &str, dbname: &str) -> FixtureResult<()> {
        execute_sql(self.client(), dbname, &sql::create_fake_pg_aoseg_table(table)).await
    }

    /// Creates `btree_<name>` on `column1` and `bitmap_<name>` on `column3`.
    pub async fn create_indexes(&self, table: &str, index_name: &str, dbname: &str) -> FixtureResult<()> {
        execute_sql(self.client(), dbname, &sql::create_indexes(table, index_name)).await?;

        self.validate_index(table, dbname).await
    }

    /// Fails unless `table` carries exactly two indexes.
    pub async fn validate_index(&self, table: &str, dbname: &str) -> FixtureResult<()> {
        let rows = get_rows(self.client(), dbname, &sql::index_rows(table)).await?;

        if rows.len() != 2 {
            warn!(dbname, table, indexes = rows.len(), "unexpected index count");
            bail!(
                ErrorKind::AssertionFailed,
                "Index creation was not successful",
                format!("Expected 2 rows does not match {} rows", rows.len())
            );
        }

        Ok(())
    }

    pub async fn analyze_database(&self, dbname: &str) -> FixtureResult<()> {
        execute_sql(self.client(), dbname, sql::analyze()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::command::output;
    use crate::test_utils::database::text_rows;
    use crate::test_utils::{test_config, test_harness};

    #[tokio::test]
    async fn create_database_retries_until_visible() {
        let (harness, client, runner) = test_harness(test_config());
        runner
            .respond_sequence(
                "createdb",
                vec![
                    output(1, "", "source database is being accessed"),
                    output(0, "", ""),
                ],
            )
            .await;
        client
            .on("pg_database", text_rows(&[&["template1"], &["testdb"]]))
            .await;

        harness.create_database("testdb").await.unwrap();

        assert_eq!(
            runner.command_lines().await,
            vec!["createdb testdb".to_owned(), "createdb testdb".to_owned()]
        );
    }

    #[tokio::test]
    async fn create_database_reraises_last_failure() {
        let (harness, _, runner) = test_harness(test_config());
        runner.respond("createdb", 2, "", "permission denied").await;

        let err = harness.create_database("testdb").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CommandFailed);
        assert!(err.detail().unwrap().contains("permission denied"));
        assert_eq!(runner.calls().await.len(), 10);
    }

    #[tokio::test]
    async fn create_database_reports_exhaustion_without_failure() {
        let (harness, _, _) = test_harness(test_config());

        let err = harness.create_database("testdb").await.unwrap_err();

        assert_eq!(err.detail(), Some("createdb for 'testdb' failed after 10 attempts"));
    }

    #[tokio::test]
    async fn drop_database_waits_until_gone() {
        let (harness, client, runner) = test_harness(test_config());
        client
            .on_sequence(
                "pg_database",
                vec![
                    text_rows(&[&["testdb"]]),
                    text_rows(&[&["testdb"]]),
                    text_rows(&[&["template1"]]),
                ],
            )
            .await;

        harness.drop_database_if_exists("testdb").await.unwrap();

        assert_eq!(runner.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn drop_database_exhaustion_message() {
        let (harness, client, _) = test_harness(test_config());
        client.on("pg_database", text_rows(&[&["testdb"]])).await;

        let err = harness.drop_database("testdb").await.unwrap_err();

        assert_eq!(err.detail(), Some("db exists after dropping: testdb"));
    }

    #[tokio::test]
    async fn int_table_checks_row_count() {
        let (harness, client, _) = test_harness(test_config());
        client.on("count(*) from t1", text_rows(&[&["1000"]])).await;

        harness.create_int_table("t1", "ao", "testdb").await.unwrap();

        assert!(client.executed().await[0].contains("WITH(APPENDONLY=TRUE)"));
        assert_eq!(
            harness
                .create_int_table("t1", "parquet", "testdb")
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidInput
        );
    }

    #[tokio::test]
    async fn create_partition_creates_then_populates() {
        let (harness, client, _) = test_harness(test_config());

        harness
            .create_partition("sales", StorageType::Co, "testdb", Some("quicklz"), true, 10)
            .await
            .unwrap();

        let executed = client.executed().await;
        assert_eq!(executed.len(), 2);
        assert!(executed[0].contains("orientation = column, compresstype = quicklz"));
        assert!(executed[1].contains("generate_series(0,10)"));
    }

    #[tokio::test]
    async fn external_partition_uses_master_host() {
        let (harness, client, _) = test_harness(test_config());
        client.on("content = -1 and role = 'p'", text_rows(&[&["mdw "]])).await;

        harness
            .create_external_partition("sales", "testdb", 8080, "sales.csv")
            .await
            .unwrap();

        let executed = client.executed().await;
        assert!(executed[0].contains("gpfdist://mdw:8080/sales.csv"));
        assert!(executed[1].contains("generate_series(0,100)"));
    }

    #[tokio::test]
    async fn modify_partition_data_rejects_unknown_partition() {
        let (harness, _, runner) = test_harness(test_config());

        let err = harness.modify_partition_data("sales", "testdb", 4).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        harness.modify_partition_data("sales", "testdb", 2).await.unwrap();
        let lines = runner.command_lines().await;
        assert_eq!(lines.len(), 10);
        assert!(lines[0].starts_with("echo \"90,backup,2011-12-30\" | psql -d testdb"));
    }

    #[tokio::test]
    async fn drop_schema_verifies_removal() {
        let (harness, client, _) = test_harness(test_config());
        client.on("pg_namespace", text_rows(&[&["s1"]])).await;

        let err = harness.drop_schema("s1", "testdb").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AssertionFailed);
        assert_eq!(client.executed().await, vec!["drop schema s1 cascade".to_owned()]);
    }

    #[tokio::test]
    async fn indexes_expect_two_rows() {
        let (harness, client, _) = test_harness(test_config());
        client.on("pg_index", text_rows(&[&["1"]])).await;

        let err = harness.create_indexes("sales", "idx", "testdb").await.unwrap_err();

        assert!(err.detail().unwrap().contains("does not match 1 rows"));
    }
}
