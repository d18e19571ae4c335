//! Statement text for every fixture operation.
//!
//! Table arguments are spliced in verbatim: callers pass names such as
//! `public.sales` or `sales_1_prt_p1` exactly as a scenario spells them.
//! Values compared against catalog columns go through [`quote_literal`].

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use pg_escape::{quote_identifier, quote_literal};

use crate::bail;
use crate::error::{ErrorKind, FixtureError, FixtureResult};

pub const PARTITION_START_DATE: &str = "2010-01-01";
pub const PARTITION_END_DATE: &str = "2013-01-01";
pub const PARTITION_INTERVAL: &str = "1 year";

/// Upper bound of the `generate_series` used to populate partitioned tables.
pub const DEFAULT_ROW_COUNT: u32 = 1094;

/// Rows inserted by [`create_int_table`].
pub const INT_TABLE_ROWS: i64 = 1000;

const PARTITION_COLUMNS: &str = "Column1 int, Column2 varchar(20), Column3 date";

/// Storage of an existing relation, as reported by `pg_class.relstorage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableType {
    Ao,
    Co,
    Heap,
    External,
    View,
}

impl TableType {
    pub fn from_relstorage(relstorage: &str) -> FixtureResult<Self> {
        match relstorage.trim() {
            "a" => Ok(Self::Ao),
            "c" => Ok(Self::Co),
            "h" => Ok(Self::Heap),
            "x" => Ok(Self::External),
            "v" => Ok(Self::View),
            other => bail!(ErrorKind::InvalidInput, "Unknown table type", other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ao => "ao",
            Self::Co => "co",
            Self::Heap => "heap",
            Self::External => "external",
            Self::View => "view",
        }
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableType {
    type Err = FixtureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ao" => Ok(Self::Ao),
            "co" => Ok(Self::Co),
            "heap" => Ok(Self::Heap),
            "external" => Ok(Self::External),
            "view" => Ok(Self::View),
            other => bail!(ErrorKind::InvalidInput, "Unknown table type", other),
        }
    }
}

/// Storage a fixture table is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Heap,
    Ao,
    Co,
}

impl StorageType {
    /// `orientation` storage option of append-only tables.
    pub fn orientation(&self) -> Option<&'static str> {
        match self {
            Self::Heap => None,
            Self::Ao => Some("row"),
            Self::Co => Some("column"),
        }
    }
}

impl FromStr for StorageType {
    type Err = FixtureError;

    /// Parses `heap`, `ao` or `co` in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HEAP" => Ok(Self::Heap),
            "AO" => Ok(Self::Ao),
            "CO" => Ok(Self::Co),
            _ => bail!(
                ErrorKind::InvalidInput,
                "Invalid table type specified",
                s
            ),
        }
    }
}

/// Append-only layout selected by [`appendonly_tables`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOnlyKind {
    Ao,
    Co,
}

// Leaf data tables of append-only relations with the aoseg relation holding
// their tuple counts. Intermediate partition levels and external tables are
// excluded.
const APPENDONLY_DATA_TABLES: &str = "\
SELECT all_data_tables.oid, all_data_tables.schemaname, all_data_tables.tablename, outer_pg_class.relname AS tupletable FROM (
  SELECT alltables.oid, alltables.schemaname, alltables.tablename FROM
    (SELECT c.oid, n.nspname AS schemaname, c.relname AS tablename FROM pg_class c, pg_namespace n
     WHERE n.oid = c.relnamespace) AS alltables,
    (SELECT n.nspname AS schemaname, c.relname AS tablename
     FROM pg_class c LEFT JOIN pg_namespace n ON n.oid = c.relnamespace
     LEFT JOIN pg_tablespace t ON t.oid = c.reltablespace
     WHERE c.relkind = 'r'::\"char\" AND c.oid > 16384 AND (c.relnamespace > 16384 OR n.nspname = 'public')
     EXCEPT
     ((SELECT x.schemaname, x.partitiontablename FROM
       (SELECT DISTINCT schemaname, tablename, partitiontablename, partitionlevel FROM pg_partitions) AS x,
       (SELECT schemaname, tablename maxtable, max(partitionlevel) maxlevel FROM pg_partitions GROUP BY (tablename, schemaname)) AS y
       WHERE x.schemaname = y.schemaname AND x.tablename = y.maxtable AND x.partitionlevel != y.maxlevel)
      UNION (SELECT DISTINCT schemaname, tablename FROM pg_partitions))) AS datatables
  WHERE alltables.schemaname = datatables.schemaname AND alltables.tablename = datatables.tablename
    AND alltables.oid NOT IN (SELECT reloid FROM pg_exttable)
) AS all_data_tables, pg_appendonly, pg_class outer_pg_class
WHERE all_data_tables.oid = pg_appendonly.relid
  AND outer_pg_class.oid = pg_appendonly.segrelid";

// Catalog

pub fn list_databases() -> &'static str {
    "select datname from pg_database"
}

pub fn schema_exists(schema: &str) -> String {
    format!(
        "select * from pg_namespace where nspname = {}",
        quote_literal(schema)
    )
}

pub fn user_tables() -> &'static str {
    "select n.nspname as schemaname, c.relname as tablename \
     from pg_class c \
     left join pg_namespace n on n.oid = c.relnamespace \
     left join pg_tablespace t on t.oid = c.reltablespace \
     where c.relkind = 'r'::\"char\" and c.oid > 16384 \
     and (c.relnamespace > 16384 or n.nspname = 'public') \
     and n.nspname not like 'pg_temp_%'"
}

pub fn table_storage(table: &str) -> String {
    format!(
        "select oid::regclass, relkind, relstorage, reloptions from pg_class where oid = {}::regclass",
        quote_literal(table)
    )
}

pub fn language_count(lanname: &str) -> String {
    format!(
        "select count(*) from pg_language where lanname = {}",
        quote_literal(lanname)
    )
}

pub fn constraint_count(conname: &str) -> String {
    format!(
        "select count(*) from pg_constraint where conname = {}",
        quote_literal(conname)
    )
}

pub fn partition_tablenames(table: &str, level: u32) -> String {
    format!(
        "select partitiontablename from pg_partitions where tablename = {} and partitionlevel = {level}",
        quote_literal(table)
    )
}

pub fn partition_names(schema: &str, table: &str, level: u32, position: u32) -> String {
    format!(
        "select partitionschemaname || '.' || partitiontablename from pg_partitions \
         where schemaname = {} and tablename = {} \
         and partitionlevel = {level} and partitionposition = {position}",
        quote_literal(schema),
        quote_literal(table)
    )
}

pub fn segment_hostnames() -> &'static str {
    "select distinct(hostname) from gp_segment_configuration where content != -1"
}

pub fn master_hostname() -> &'static str {
    "select distinct hostname from gp_segment_configuration where content = -1 and role = 'p'"
}

pub fn primary_hosts() -> &'static str {
    "select distinct hostname from gp_segment_configuration where role = 'p'"
}

pub fn hosts_and_datadirs() -> &'static str {
    "select hostname, fselocation from gp_segment_configuration, pg_filespace_entry \
     where fsedbid = dbid and role = 'p'"
}

pub fn backup_dirs_for_host(host: &str) -> String {
    format!(
        "select f.fselocation from pg_filespace_entry f inner join gp_segment_configuration g \
         on f.fsedbid = g.dbid and g.role = 'p' and g.hostname = {}",
        quote_literal(host)
    )
}

pub fn table_oid(schema: &str, table: &str) -> String {
    format!(
        "select c.oid from pg_class c, pg_namespace n \
         where c.relnamespace = n.oid and c.relname = {} and n.nspname = {}",
        quote_literal(table),
        quote_literal(schema)
    )
}

pub fn row_count(table: &str) -> String {
    format!("select count(*) from {table}")
}

pub fn appendonly_tables(kind: AppendOnlyKind) -> String {
    let columnstore = match kind {
        AppendOnlyKind::Ao => 'f',
        AppendOnlyKind::Co => 't',
    };

    format!("{APPENDONLY_DATA_TABLES} AND pg_appendonly.columnstore = '{columnstore}'")
}

/// Layout of every segment, ordered by dbid.
pub fn segment_configuration() -> &'static str {
    "select dbid, content, role, preferred_role, mode, status, port, hostname, address \
     from gp_segment_configuration order by dbid"
}

pub fn change_tracking_count() -> &'static str {
    "select count(*) from gp_segment_configuration where mode = 'c'"
}

pub fn not_insync_or_down_count() -> &'static str {
    "select count(*) from gp_segment_configuration where mode <> 's' or status <> 'u'"
}

pub fn resync_count() -> &'static str {
    "select count(*) from gp_segment_configuration where mode = 'r'"
}

pub fn not_insync_count() -> &'static str {
    "select count(*) from gp_segment_configuration where mode <> 's'"
}

/// Filespace locations of the master (`content = -1`) or segment rows with
/// the given preferred role.
pub fn filespace_entries(preferred_role: char, master: bool) -> String {
    let content = if master { "content = -1" } else { "content > -1" };

    format!(
        "select hostname, dbid, fselocation from pg_filespace_entry, gp_segment_configuration \
         where dbid = fsedbid and preferred_role = '{preferred_role}' and {content}"
    )
}

// DDL

pub fn create_schema(schema: &str) -> String {
    format!("create schema {schema}")
}

pub fn drop_schema(schema: &str) -> String {
    format!("drop schema {schema} cascade")
}

pub fn drop_table(table: &str) -> String {
    format!("drop table {table}")
}

pub fn drop_external_table(table: &str) -> String {
    format!("drop external table {table}")
}

pub fn create_int_table(table: &str, storage: StorageType) -> String {
    let with = match storage {
        StorageType::Heap => "",
        StorageType::Ao => " WITH(APPENDONLY=TRUE)",
        StorageType::Co => " WITH(APPENDONLY=TRUE, orientation=column)",
    };

    format!("create table {table}{with} as select generate_series(1, {INT_TABLE_ROWS}) as c1")
}

/// `CREATE TABLE` for the list/range partitioned fixture table.
///
/// `compression` only applies to append-only storage, where it lands in the
/// same `WITH` clause as the orientation.
pub fn create_partition(
    table: &str,
    storage: StorageType,
    compression: Option<&str>,
    partition: bool,
) -> String {
    let mut sql = format!("Create table {table}({PARTITION_COLUMNS})");

    if let Some(orientation) = storage.orientation() {
        sql.push_str(&format!(" WITH(appendonly = true, orientation = {orientation}"));
        if let Some(compression) = compression {
            sql.push_str(&format!(", compresstype = {compression}"));
        }
        sql.push_str(") ");
    }

    if partition {
        sql.push_str(&format!(
            " Distributed Randomly Partition by list(Column2) \
             Subpartition by range(Column3) Subpartition Template \
             (start (date '{PARTITION_START_DATE}') end (date '{PARTITION_END_DATE}') every (interval '{PARTITION_INTERVAL}')) \
             (Partition p1 values('backup'), Partition p2 values('restore'))"
        ));
    }

    sql.push(';');
    sql
}

/// Inserts `rowcount + 1` `backup` rows and as many `restore` rows.
pub fn populate_partition(table: &str, start_date: &str, offset: u32, rowcount: u32) -> String {
    ["backup", "restore"]
        .iter()
        .map(|value| {
            format!(
                "insert into {table} select i+{offset}, '{value}', i + date '{start_date}' \
                 from generate_series(0,{rowcount}) as i"
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn create_mixed_storage_partition(table: &str) -> String {
    format!(
        "Create table {table} ({PARTITION_COLUMNS}) Distributed randomly \
         Partition by list(Column2) \
         Subpartition by range(Column3) Subpartition Template ( \
         subpartition s_1 start(date '2010-01-01') end(date '2011-01-01') with (appendonly=true, orientation=column, compresstype=quicklz, compresslevel=1), \
         subpartition s_2 start(date '2011-01-01') end(date '2012-01-01') with (appendonly=true, orientation=row, compresstype=zlib, compresslevel=1), \
         subpartition s_3 start(date '2012-01-01') end(date '2013-01-01') with (appendonly=true, orientation=column), \
         subpartition s_4 start(date '2013-01-01') end(date '2014-01-01') with (appendonly=true, orientation=row), \
         subpartition s_5 start(date '2014-01-01') end(date '2015-01-01') ) \
         (partition p1 values('backup'), partition p2 values('restore'))"
    )
}

/// Range partitioned table whose `p_2` partition is swapped for a readable
/// gpfdist external table served from the master.
pub fn create_external_partition(
    table: &str,
    master_host: &str,
    port: u16,
    filename: &str,
) -> String {
    let create_table = format!(
        "Create table {table} ({PARTITION_COLUMNS}) Distributed randomly \
         Partition by range(Column3) ( \
         partition p_1 start(date '2010-01-01') end(date '2011-01-01') with (appendonly=true, orientation=column, compresstype=quicklz, compresslevel=1), \
         partition p_2 start(date '2011-01-01') end(date '2012-01-01') with (appendonly=true, orientation=row, compresstype=zlib, compresslevel=1), \
         partition s_3 start(date '2012-01-01') end(date '2013-01-01') with (appendonly=true, orientation=column), \
         partition s_4 start(date '2013-01-01') end(date '2014-01-01') with (appendonly=true, orientation=row), \
         partition s_5 start(date '2014-01-01') end(date '2015-01-01') )"
    );
    let create_external = format!(
        "Create readable external table {table}_ret ({PARTITION_COLUMNS}) \
         location ('gpfdist://{master_host}:{port}/{filename}') \
         format 'csv' encoding 'utf-8' \
         log errors segment reject limit 1000"
    );
    let exchange =
        format!("Alter table {table} exchange partition p_2 with table {table}_ret without validation");
    let drop = format!("Drop table {table}_ret");

    [create_table, create_external, exchange, drop].join("; ")
}

pub fn add_partition(num: u32, table: &str) -> String {
    format!(
        "alter table {table} add default partition p{num}; \
         insert into {table} select i+{num}, 'update', i + date '{PARTITION_START_DATE}' \
         from generate_series(0,{DEFAULT_ROW_COUNT}) as i"
    )
}

pub fn drop_partition(num: u32, table: &str) -> String {
    format!("alter table {table} drop partition p{num}")
}

/// Two-level 74x74 range partitioning, or a single level of
/// `num_partitions - 1` partitions when a count is given.
pub fn create_large_num_partitions(
    storage: StorageType,
    table: &str,
    num_partitions: Option<u32>,
) -> String {
    let with = match storage {
        StorageType::Heap => "",
        StorageType::Ao => " with(appendonly=true)",
        StorageType::Co => " with(appendonly=true, orientation=column)",
    };

    match num_partitions {
        None => format!(
            "create table {table} (column1 int, column2 int){with} partition by range(column1) \
             subpartition by range(column2) subpartition template(start(1) end(75) every(1)) \
             (start(1) end(75) every(1))"
        ),
        Some(num) => format!(
            "create table {table} (column1 int, column2 int){with} partition by range(column1) \
             (start(1) end({num}) every(1))"
        ),
    }
}

pub fn pg_class_count(relname: &str) -> String {
    format!(
        "select count(*) from pg_class where relname = {}",
        quote_literal(relname)
    )
}

pub fn create_indexes(table: &str, index_name: &str) -> String {
    format!(
        "create index btree_{index_name} on {table} using btree(column1); \
         create index bitmap_{index_name} on {table} using bitmap(column3)"
    )
}

pub fn index_rows(table: &str) -> String {
    format!(
        "select count(indexrelid::regclass) from pg_index, pg_class \
         where indrelid = {}::regclass group by indexrelid",
        quote_literal(table)
    )
}

pub fn create_fake_pg_aoseg_table(table: &str) -> String {
    format!(
        "CREATE TABLE {table}(segno int, \
         eof double precision, \
         tupcount double precision, \
         modcount bigint, \
         varblockcount double precision, \
         eofuncompressed double precision)"
    )
}

// DML

pub fn truncate(table: &str) -> String {
    format!("TRUNCATE {table}")
}

pub fn insert_numbers(table: &str, low: i64, high: i64) -> String {
    format!("insert into {table} select generate_series({low}, {high})")
}

pub fn insert_row(table: &str, values: &str) -> String {
    format!("INSERT INTO {table} values({values})")
}

pub fn delete_rows(table: &str, column: &str, info: &str) -> String {
    format!("DELETE FROM {table} WHERE {column} = {info}")
}

pub fn analyze() -> &'static str {
    "analyze"
}

// Backup and restore comparison

/// Comma separated list `1..=relnatts+1`, ordering every column of
/// `select gp_segment_id, *`.
pub fn column_order(table: &str) -> String {
    let table = quote_literal(table.trim());

    format!(
        "select string_agg(a, ',') from ( \
         select generate_series(1, c.relnatts + 1)::text as a \
         from pg_class as c inner join pg_namespace as n on c.relnamespace = n.oid \
         where (n.nspname || '.' || c.relname = {table}) or c.relname = {table} \
         ) as q"
    )
}

pub fn copy_table_to_file(table: &str, order: &str, path: &Path) -> String {
    format!(
        "COPY (select gp_segment_id, * from {} order by {order}) TO {}",
        table.trim(),
        quote_literal(&path.to_string_lossy())
    )
}

pub fn copy_dist_policy_to_file(path: &Path) -> String {
    format!(
        "COPY (select c.relname as tablename, p.attrnums as distribution_policy \
         from pg_class c inner join gp_distribution_policy p \
         on (c.relfilenode = p.localoid) and c.relstorage != 'x' \
         order by c.relname) TO {}",
        quote_literal(&path.to_string_lossy())
    )
}

pub fn segment_row_counts(table: &str) -> String {
    format!(
        "select gp_segment_id, count(*) from gp_dist_random({}) group by gp_segment_id",
        quote_literal(table)
    )
}

pub fn relstorage(table: &str) -> String {
    format!(
        "select oid::regclass, relstorage from pg_class where oid = {}::regclass",
        quote_literal(table)
    )
}

pub fn aoseg_tuple_sum(tupletable: &str) -> String {
    format!(
        "select to_char(sum(tupcount::bigint), '999999999999999999999') from pg_aoseg.{}",
        quote_identifier(tupletable.trim())
    )
}

pub fn aoseg_relname(table: &str) -> String {
    format!(
        "select relname from pg_class where oid in (select segrelid from pg_appendonly \
         where relid in (select oid from pg_class where relname = {}))",
        quote_literal(table)
    )
}

pub fn aoseg_tupcount(tupletable: &str) -> String {
    format!(
        "select tupcount from pg_aoseg.{}",
        quote_identifier(tupletable.trim())
    )
}

pub fn last_truncate(oid: u32) -> String {
    format!("SELECT * FROM pg_stat_last_operation WHERE objid = {oid} and staactionname = 'TRUNCATE'")
}

pub fn last_truncate_count(oid: u32) -> String {
    format!(
        "SELECT count(*) FROM pg_stat_last_operation WHERE objid = {oid} and staactionname = 'TRUNCATE'"
    )
}

pub fn reltuples(relname: &str) -> String {
    format!(
        "SELECT reltuples FROM pg_class WHERE relname = {}",
        quote_literal(relname)
    )
}
