//! Comparison of table data, distribution policies and statistics across a
//! backup and restore cycle.
//!
//! Table contents are dumped with server side `COPY ... TO` into the
//! configured data directory as `<table>_backup` before the backup and
//! `<table>_restore` after the restore, then compared byte for byte.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::bail;
use crate::catalog::AppendOnlyTable;
use crate::command::CommandRunner;
use crate::database::{SqlClient, execute_sql, execute_sql_singleton, get_row, get_rows};
use crate::error::{ErrorKind, FixtureResult};
use crate::harness::Harness;
use crate::sql;

const BACKUP_SUFFIX: &str = "_backup";
const RESTORE_SUFFIX: &str = "_restore";

/// Columns of a `pg_stat_last_operation` row.
const LAST_OPERATION_COLUMNS: usize = 7;

/// Storage expected at each position of a mixed storage partition table.
fn mixed_partition_storage(position: usize) -> &'static str {
    match position {
        0 | 2 | 5 | 7 => "c",
        1 | 3 | 6 | 8 => "a",
        _ => "h",
    }
}

/// Fails when the two files differ.
pub async fn diff_backup_restore_data(backup_file: &Path, restore_file: &Path) -> FixtureResult<()> {
    let backup = tokio::fs::read(backup_file).await?;
    let restore = tokio::fs::read(restore_file).await?;

    if backup != restore {
        bail!(
            ErrorKind::DataMismatch,
            "Backup and restore data differ",
            format!(
                "{} and {} do not match",
                backup_file.display(),
                restore_file.display()
            )
        );
    }

    Ok(())
}

/// Fails when the last comma separated field of any line is a decimal
/// number instead of an integer.
pub async fn verify_integer_tuple_counts(file: &Path) -> FixtureResult<()> {
    let contents = tokio::fs::read_to_string(file).await?;
    let float = Regex::new(r"^\d+?\.\d+?$")?;

    for line in contents.lines() {
        let tupcount = line.rsplit(',').next().unwrap_or_default().trim();
        if float.is_match(tupcount) {
            bail!(
                ErrorKind::DataMismatch,
                "Expected an integer tuplecount found float",
                file.display()
            );
        }
    }

    Ok(())
}

impl<C, R> Harness<C, R>
where
    C: SqlClient,
    R: CommandRunner,
{
    /// Absolute path of `filename` in the data directory; `COPY ... TO` runs
    /// in the server's working directory.
    pub fn data_file(&self, filename: &str) -> FixtureResult<PathBuf> {
        Ok(std::path::absolute(self.config().data_dir.join(filename))?)
    }

    /// Dumps `table`, prefixed by `gp_segment_id` and ordered on every
    /// column, into `filename`.
    ///
    /// Failures are logged and otherwise ignored: the file then goes missing
    /// or stale and the comparison that follows reports it.
    pub async fn get_table_data_to_file(&self, filename: &str, table: &str, dbname: &str) {
        if let Err(err) = self.copy_table_to_file(filename, table, dbname).await {
            warn!(dbname, table, filename, "cannot dump table data: {err}");
        }
    }

    async fn copy_table_to_file(&self, filename: &str, table: &str, dbname: &str) -> FixtureResult<()> {
        let path = self.data_file(filename)?;
        let order = execute_sql_singleton(self.client(), dbname, &sql::column_order(table)).await?;

        debug!(dbname, table, path = %path.display(), "dumping table data");
        execute_sql(
            self.client(),
            dbname,
            &sql::copy_table_to_file(table, &order, &path),
        )
        .await
    }

    pub async fn backup_data(&self, table: &str, dbname: &str) {
        let filename = format!("{}{BACKUP_SUFFIX}", table.trim());
        self.get_table_data_to_file(&filename, table, dbname).await;
    }

    /// Dumps every user table of `dbname`.
    pub async fn backup_db_data(&self, dbname: &str) -> FixtureResult<()> {
        let tables = self.get_table_names(dbname).await?;
        info!(dbname, tables = tables.len(), "backing up table data");

        for table in &tables {
            self.backup_data(&table.qualified(), dbname).await;
        }

        Ok(())
    }

    /// Dumps `table` again and compares it with its backup.
    pub async fn validate_restore_data(&self, table: &str, dbname: &str) -> FixtureResult<()> {
        let table = table.trim();
        let restore = format!("{table}{RESTORE_SUFFIX}");
        self.get_table_data_to_file(&restore, table, dbname).await;

        let backup_file = self.data_file(&format!("{table}{BACKUP_SUFFIX}"))?;
        let restore_file = self.data_file(&restore)?;

        diff_backup_restore_data(&backup_file, &restore_file).await
    }

    /// Checks the number of user tables, then the data of each one.
    pub async fn validate_db_data(&self, dbname: &str, expected_table_count: usize) -> FixtureResult<()> {
        let tables = self.get_table_names(dbname).await?;
        if tables.len() != expected_table_count {
            bail!(
                ErrorKind::AssertionFailed,
                "Unexpected number of tables",
                format!(
                    "db {dbname} does not have expected number of tables {expected_table_count} != {}",
                    tables.len()
                )
            );
        }

        for table in &tables {
            self.validate_restore_data(&table.qualified(), dbname).await?;
        }

        Ok(())
    }

    /// Validates every non-empty table and checks how many there were.
    pub async fn validate_num_restored_tables(&self, num_tables: usize, dbname: &str) -> FixtureResult<()> {
        let tables = self.get_table_names(dbname).await?;

        let mut validated = 0;
        for table in &tables {
            let count = self
                .count(dbname, &sql::row_count(&table.as_quoted_identifier()))
                .await?;
            if count == 0 {
                continue;
            }

            self.validate_restore_data(&table.qualified(), dbname).await?;
            validated += 1;
        }

        if validated != num_tables {
            bail!(
                ErrorKind::AssertionFailed,
                "Invalid number of tables were restored",
                format!("Expected \"{num_tables}\", Actual \"{validated}\"")
            );
        }

        Ok(())
    }

    /// Removes every file from the data directory.
    pub async fn clear_all_saved_data_verify_files(&self) -> FixtureResult<()> {
        let data_dir = &self.config().data_dir;
        if !tokio::fs::try_exists(data_dir).await? {
            return Ok(());
        }

        let mut entries = tokio::fs::read_dir(data_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }

        Ok(())
    }

    async fn dist_policy_to_file(&self, filename: &str, dbname: &str) -> FixtureResult<()> {
        let path = self.data_file(filename)?;

        execute_sql(self.client(), dbname, &sql::copy_dist_policy_to_file(&path)).await
    }

    /// Dumps the distribution policy of every non-external table.
    pub async fn get_distribution_policy(&self, dbname: &str) -> FixtureResult<()> {
        let filename = format!("{}_dist_policy{BACKUP_SUFFIX}", dbname.trim());

        self.dist_policy_to_file(&filename, dbname).await
    }

    pub async fn validate_distribution_policy(&self, dbname: &str) -> FixtureResult<()> {
        let dbname = dbname.trim();
        let restore = format!("{dbname}_dist_policy{RESTORE_SUFFIX}");
        self.dist_policy_to_file(&restore, dbname).await?;

        let backup_file = self.data_file(&format!("{dbname}_dist_policy{BACKUP_SUFFIX}"))?;
        let restore_file = self.data_file(&restore)?;

        diff_backup_restore_data(&backup_file, &restore_file).await
    }

    /// Fails when some segment holds no rows of `table`.
    pub async fn validate_table_data_on_segments(&self, table: &str, dbname: &str) -> FixtureResult<()> {
        let rows = get_rows(self.client(), dbname, &sql::segment_row_counts(table)).await?;

        for row in &rows {
            if row.get_i64(1)? == 0 {
                bail!(
                    ErrorKind::DataMismatch,
                    "Data not present in segment",
                    row.get_str(0)?
                );
            }
        }

        Ok(())
    }

    pub async fn validate_part_table_data_on_segments(
        &self,
        table: &str,
        level: u32,
        dbname: &str,
    ) -> FixtureResult<()> {
        for partition in self.get_partition_tablenames(table, dbname, level).await? {
            self.validate_table_data_on_segments(&partition, dbname)
                .await?;
        }

        Ok(())
    }

    /// Fails unless `relstorage` of `partition` is `storage`.
    pub async fn validate_storage_type(&self, partition: &str, storage: &str, dbname: &str) -> FixtureResult<()> {
        let rows = get_rows(self.client(), dbname, &sql::relstorage(partition)).await?;

        for row in &rows {
            let actual = row.get_str(1)?.trim();
            if actual != storage.trim() {
                bail!(
                    ErrorKind::AssertionFailed,
                    "The storage type of the partition is not as expected",
                    format!("{partition} has {actual}, expected {storage}")
                );
            }
        }

        Ok(())
    }

    /// Checks the storage of the partitions built by
    /// [`Harness::create_mixed_storage_partition`].
    pub async fn validate_mixed_partition_storage_types(&self, table: &str, dbname: &str) -> FixtureResult<()> {
        let partitions = self.get_partition_tablenames(table, dbname, 1).await?;

        for (position, partition) in partitions.iter().enumerate() {
            self.validate_storage_type(partition, mixed_partition_storage(position), dbname)
                .await?;
        }

        Ok(())
    }

    /// Compares the aoseg tuple count of each table with its row count.
    pub async fn verify_stats(&self, dbname: &str, partitions: &[AppendOnlyTable]) -> FixtureResult<()> {
        for partition in partitions {
            let row = get_row(
                self.client(),
                dbname,
                &sql::aoseg_tuple_sum(&partition.tupletable),
            )
            .await?;

            // sum() over an empty aoseg relation is NULL.
            let tuple_count = match row.as_ref().and_then(|row| row.get_opt(0)) {
                Some(value) => value.trim().parse::<i64>()?,
                None => 0,
            };

            self.validate_tuple_count(dbname, &partition.schema, &partition.table, tuple_count)
                .await?;
        }

        Ok(())
    }

    pub async fn validate_tuple_count(
        &self,
        dbname: &str,
        schema: &str,
        partition: &str,
        tuple_count: i64,
    ) -> FixtureResult<()> {
        let row_count = self
            .count(dbname, &sql::row_count(&format!("{schema}.{partition}")))
            .await?;

        if row_count != tuple_count {
            bail!(
                ErrorKind::DataMismatch,
                "Stats for the table does not match",
                format!(
                    "{schema}.{partition}: stat count \"{tuple_count}\" does not match the actual tuple count \"{row_count}\""
                )
            );
        }

        Ok(())
    }

    /// Fails when the aoseg relation of `table` holds any row.
    pub async fn validate_no_aoco_stats(&self, dbname: &str, table: &str) -> FixtureResult<()> {
        let tupletable = execute_sql_singleton(self.client(), dbname, &sql::aoseg_relname(table)).await?;
        let rows = get_rows(self.client(), dbname, &sql::aoseg_tupcount(&tupletable)).await?;

        if let Some(first) = rows.first() {
            bail!(
                ErrorKind::DataMismatch,
                "Table has stats and should have none",
                format!(
                    "{table} has stats of {} rows in {} table and should be 0",
                    first.get_opt(0).unwrap_or("NULL"),
                    tupletable.trim()
                )
            );
        }

        Ok(())
    }

    /// Checks the `TRUNCATE` entry recorded for `oid`.
    pub async fn verify_truncate_in_pg_stat_last_operation(&self, dbname: &str, oid: u32) -> FixtureResult<()> {
        let Some(row) = get_row(self.client(), dbname, &sql::last_truncate(oid)).await? else {
            bail!(
                ErrorKind::EmptyResult,
                "No TRUNCATE recorded in pg_stat_last_operation",
                oid
            );
        };

        if row.len() != LAST_OPERATION_COLUMNS {
            bail!(
                ErrorKind::AssertionFailed,
                "Invalid number of columns",
                row.len()
            );
        }

        let action = row.get_opt(2).unwrap_or_default();
        if action != "TRUNCATE" {
            bail!(
                ErrorKind::AssertionFailed,
                "Actiontype not expected TRUNCATE",
                action
            );
        }

        if let Some(subtype) = row.get_opt(5).filter(|subtype| !subtype.is_empty()) {
            bail!(
                ErrorKind::AssertionFailed,
                "Subtype for TRUNCATE operation is not empty",
                subtype
            );
        }

        Ok(())
    }

    pub async fn verify_truncate_not_in_pg_stat_last_operation(
        &self,
        dbname: &str,
        oid: u32,
    ) -> FixtureResult<()> {
        let query = sql::last_truncate_count(oid);
        let count = self.count(dbname, &query).await?;

        if count != 0 {
            bail!(
                ErrorKind::AssertionFailed,
                "Unexpected TRUNCATE in pg_stat_last_operation",
                format!("Found {count} rows from query '{query}' should be 0")
            );
        }

        Ok(())
    }

    /// Whether `reltuples` of the table matches its row count, i.e. the
    /// restore analyzed it.
    pub async fn verify_restored_table_is_analyzed(&self, table: &str, dbname: &str) -> FixtureResult<bool> {
        let counts = get_rows(self.client(), dbname, &sql::row_count(table)).await?;

        let relname = table.split_once('.').map_or(table, |(_, name)| name);
        let reltuples = get_rows(self.client(), dbname, &sql::reltuples(relname)).await?;

        if counts.len() != reltuples.len() {
            return Ok(false);
        }

        for (count, estimate) in counts.iter().zip(&reltuples) {
            if count.get_f64(0)? != estimate.get_f64(0)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Compares `select *` output of `table` on this cluster and on the
    /// gptransfer source.
    pub async fn match_table_select(
        &self,
        table: &str,
        dbname: &str,
        orderby: Option<&str>,
    ) -> FixtureResult<()> {
        let Some(source) = &self.config().transfer_source else {
            bail!(
                ErrorKind::ConfigError,
                "gptransfer source is not configured"
            );
        };

        let select = match orderby {
            Some(orderby) => format!("select * from {table} order by {orderby}"),
            None => format!("select * from {table}"),
        };
        let local = format!("psql -d {dbname} -c '{select}'");
        let remote = format!(
            "psql -p {} -h {} -U {} -d {dbname} -c '{select}'",
            source.port, source.host, source.user
        );

        let destination_output = self.run_cmd(&local).await?;
        let source_output = self.run_cmd(&remote).await?;

        if destination_output.stdout != source_output.stdout {
            bail!(
                ErrorKind::DataMismatch,
                "Table differs between source and destination system",
                format!("table {table} in database {dbname}")
            );
        }

        Ok(())
    }
}
