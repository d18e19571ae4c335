#![cfg(feature = "test-utils")]

use std::fs;
use std::path::Path;

use gpfixture::error::ErrorKind;
use gpfixture::sql::{AppendOnlyKind, StorageType};
use gpfixture::test_utils::database::{ScriptedSqlClient, text_rows};
use gpfixture::test_utils::{TestHarness, test_config, test_harness};
use gpfixture_telemetry::tracing::init_test_tracing;

const DBNAME: &str = "bkdb";

fn harness_in(data_dir: &Path) -> (TestHarness, ScriptedSqlClient) {
    let mut config = test_config();
    config.data_dir = data_dir.to_path_buf();
    let (harness, client, _) = test_harness(config);

    (harness, client)
}

/// Stands in for the server writing a `COPY ... TO` file.
fn dump(data_dir: &Path, filename: &str, contents: &str) {
    fs::write(data_dir.join(filename), contents).unwrap();
}

#[tokio::test]
async fn partition_table_survives_backup_and_restore() {
    init_test_tracing();

    let data_dir = tempfile::tempdir().unwrap();
    let (harness, client) = harness_in(data_dir.path());
    client
        .on("pg_temp_", text_rows(&[&["public", "sales"], &["public", "t1"]]))
        .await;
    client.on("string_agg", text_rows(&[&["1,2,3,4"]])).await;
    client.on("count(*) from public.sales", text_rows(&[&["1094"]])).await;
    client.on("count(*) from public.t1", text_rows(&[&["1000"]])).await;
    client.on("count(*) from t1", text_rows(&[&["1000"]])).await;

    harness
        .create_partition("sales", StorageType::Ao, DBNAME, None, true, 1094)
        .await
        .unwrap();
    harness.create_int_table("t1", "heap", DBNAME).await.unwrap();
    harness.backup_db_data(DBNAME).await.unwrap();
    harness.get_distribution_policy(DBNAME).await.unwrap();

    let copies: Vec<String> = client
        .executed()
        .await
        .into_iter()
        .filter(|sql| sql.starts_with("COPY"))
        .collect();
    assert_eq!(copies.len(), 3);
    assert!(copies[0].contains("from public.sales order by 1,2,3,4"));
    assert!(copies[2].contains("bkdb_dist_policy_backup"));

    for name in ["public.sales", "public.t1"] {
        dump(data_dir.path(), &format!("{name}_backup"), "0\t1\n1\t2\n");
        dump(data_dir.path(), &format!("{name}_restore"), "0\t1\n1\t2\n");
    }
    dump(data_dir.path(), "bkdb_dist_policy_backup", "sales\t{1}\n");
    dump(data_dir.path(), "bkdb_dist_policy_restore", "sales\t{1}\n");

    harness.validate_db_data(DBNAME, 2).await.unwrap();
    harness.validate_num_restored_tables(2, DBNAME).await.unwrap();
    harness.validate_distribution_policy(DBNAME).await.unwrap();

    harness.clear_all_saved_data_verify_files().await.unwrap();
    assert_eq!(fs::read_dir(data_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn changed_rows_are_reported_after_restore() {
    init_test_tracing();

    let data_dir = tempfile::tempdir().unwrap();
    let (harness, client) = harness_in(data_dir.path());
    client.on("pg_temp_", text_rows(&[&["public", "t1"]])).await;

    dump(data_dir.path(), "public.t1_backup", "0\t1\n");
    dump(data_dir.path(), "public.t1_restore", "0\t1\n1\t2\n");

    let err = harness.validate_db_data(DBNAME, 1).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DataMismatch);
    assert!(err.detail().unwrap().contains("public.t1_backup"));
}

#[tokio::test]
async fn restored_ao_table_keeps_its_stats() {
    init_test_tracing();

    let (harness, client, _) = test_harness(test_config());
    client
        .on(
            "pg_appendonly.columnstore = 'f'",
            text_rows(&[&["16385", "public", "sales", "pg_aoseg_16385"]]),
        )
        .await;
    client.on("sum(tupcount", text_rows(&[&["1094"]])).await;
    client.on("count(*) from public.sales", text_rows(&[&["1094"]])).await;

    let tables = harness
        .get_partition_list(AppendOnlyKind::Ao, DBNAME)
        .await
        .unwrap();
    harness.verify_stats(DBNAME, &tables).await.unwrap();
}
